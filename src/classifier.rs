//! Free-text log line classification.
//!
//! VRChat writes presence information as unstructured text lines tagged
//! with `[Behaviour]` plus an event word (`OnJoinedRoom`,
//! `OnPlayerJoined`, `OnPlayerLeft`, `OnLeftRoom`), alongside free-text
//! room/instance transition phrases carrying a `wrld_...` world token.
//! [`LineClassifier`] pattern-matches a raw line against those shapes and
//! extracts structured fields.
//!
//! All patterns are compiled once at construction and held as immutable
//! fields; the classifier keeps no other state and `classify` is a pure
//! function of its input.

use regex::Regex;

use crate::normalize::normalize;

/// A typed event extracted from a single raw log line.
///
/// Lines that match none of the known shapes produce no event at all;
/// classification never fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    /// The local client left the current room (`OnLeftRoom`).
    RoomLeft,

    /// A room/instance transition line. `world_id` may be empty when only
    /// the verb phrase matched.
    RoomEnter {
        world_id: String,
        instance_id: Option<String>,
        raw: String,
    },

    /// The local client finished joining a room (`OnJoinedRoom`).
    ///
    /// The raw line is retained so the session layer can re-run field
    /// extraction for the embedded name/id.
    SelfJoin { raw: String },

    /// Another player joined the instance (`OnPlayerJoined`).
    PlayerJoin {
        display_name: String,
        user_id: Option<String>,
        placeholder: Option<String>,
        raw: String,
    },

    /// A player left the instance (`OnPlayerLeft`).
    PlayerLeft {
        display_name: String,
        user_id: Option<String>,
        raw: String,
    },
}

/// Fields recovered from the remainder of a behaviour-tag line.
///
/// Absence of a field is an empty string / `None`, never an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedFields {
    pub display_name: String,
    pub user_id: Option<String>,
    pub placeholder: Option<String>,
}

/// Generic stand-in labels the log uses when it has no resolvable
/// identity for a player. The empty string counts as a placeholder.
const PLACEHOLDER_VOCABULARY: &[&str] = &["", "player", "you", "someone", "a player"];

/// Classifies raw log lines into [`LogEvent`]s.
#[derive(Debug)]
pub struct LineClassifier {
    behaviour_tag: Regex,
    room_verb: Regex,
    room_context: Regex,
    world_token: Regex,
    name_kv: Regex,
    userid_kv: Regex,
    userid_paren: Regex,
    usr_token: Regex,
    bracketed_span: Regex,
    field_marker: Regex,
}

impl Default for LineClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl LineClassifier {
    /// Compiles the line grammar.
    ///
    /// The patterns are fixed string literals; compilation cannot fail at
    /// runtime and the panic branch is unreachable for them.
    #[must_use]
    pub fn new() -> Self {
        // Localized room/instance terms observed in the wild: Japanese
        // and Korean clients log their own words for "room"/"instance".
        Self {
            behaviour_tag: compile(r"(?i)\[behaviour\]"),
            room_verb: compile(r"(?i)\b(?:entering|joining|creating)\s+(?:a\s+)?(?:room|instance)\b"),
            room_context: compile(r"(?i)\broom\b|\binstance\b|ルーム|インスタンス"),
            world_token: compile(r"(?i)\b(wrld_[0-9a-f][0-9a-f\-]*)(?::([^\s,]+))?"),
            name_kv: compile(r#"(?i)\b(?:displayname|name)\s*[=:]\s*"?([^",)\]}>|]+)"#),
            userid_kv: compile(r"(?i)\buserid\s*[=:]\s*\(?\s*(usr_[0-9a-zA-Z\-]+)"),
            userid_paren: compile(r"\(\s*(usr_[0-9a-zA-Z\-]+)\s*\)"),
            usr_token: compile(r"(?i)\busr_[0-9a-zA-Z\-]+"),
            bracketed_span: compile(r"\([^)]*\)|\[[^\]]*\]|\{[^}]*\}|<[^>]*>"),
            field_marker: compile(r"(?i)\b(?:displayname|name|userid)\b"),
        }
    }

    /// Classifies a raw line, first match wins.
    ///
    /// Precedence: room-left, room transition, self-join, player-left,
    /// player-join. Unrecognized lines return `None`.
    pub fn classify(&self, raw: &str) -> Option<LogEvent> {
        let lower = raw.to_lowercase();

        if lower.contains("onleftroom") {
            return Some(LogEvent::RoomLeft);
        }

        let has_world = self.world_token.is_match(raw);
        if self.room_verb.is_match(raw) || (has_world && self.room_context.is_match(raw)) {
            let (world_id, instance_id) = match self.world_token.captures(raw) {
                Some(caps) => (
                    caps[1].to_string(),
                    caps.get(2).map(|m| m.as_str().to_string()),
                ),
                None => (String::new(), None),
            };
            return Some(LogEvent::RoomEnter {
                world_id,
                instance_id,
                raw: raw.to_string(),
            });
        }

        if !self.behaviour_tag.is_match(raw) {
            return None;
        }

        if lower.contains("onjoinedroom") {
            return Some(LogEvent::SelfJoin {
                raw: raw.to_string(),
            });
        }

        if lower.contains("onplayerleft") {
            let fields = self.extract_fields(raw, "OnPlayerLeft");
            return Some(LogEvent::PlayerLeft {
                display_name: fields.display_name,
                user_id: fields.user_id,
                raw: raw.to_string(),
            });
        }

        if lower.contains("onplayerjoined") {
            let fields = self.extract_fields(raw, "OnPlayerJoined");
            return Some(LogEvent::PlayerJoin {
                display_name: fields.display_name,
                user_id: fields.user_id,
                placeholder: fields.placeholder,
                raw: raw.to_string(),
            });
        }

        None
    }

    /// Heuristic field surgery on everything after `event_token`.
    ///
    /// Locates the token case-insensitively, strips leading separators
    /// from the remainder, then recovers the placeholder label, display
    /// name, and `usr_...` id as described below. Tolerates any missing
    /// field and never fails.
    pub fn extract_fields(&self, line: &str, event_token: &str) -> ExtractedFields {
        let Some(idx) = find_ascii_ci(line, event_token) else {
            return ExtractedFields::default();
        };
        let remainder = &line[idx + event_token.len()..];
        let after = remainder.trim_start_matches(|c: char| {
            c.is_whitespace() || matches!(c, '-' | ':' | '|' | '\u{2013}' | '\u{2014}')
        });

        // Placeholder: the remainder up to the first field-marker word or
        // bracket, kept only when it lands in the closed vocabulary.
        let cut = [
            self.field_marker.find(after).map(|m| m.start()),
            after.find(|c| matches!(c, '(' | '[' | '{' | '<')),
        ]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or(after.len());
        let candidate = normalize(&after[..cut]).to_lowercase();
        let placeholder = PLACEHOLDER_VOCABULARY
            .contains(&candidate.as_str())
            .then_some(candidate);

        // User id: parenthesized token first, explicit key-value second.
        let user_id = self
            .userid_paren
            .captures(after)
            .or_else(|| self.userid_kv.captures(after))
            .map(|caps| caps[1].to_string());

        // Display name: explicit key-value wins; otherwise the remainder
        // with bracketed spans and user-id tokens cut out. An unquoted
        // key-value capture runs until a stop character, so it is cut at
        // the next field-marker word to keep trailing pairs out.
        let mut display_name = self
            .name_kv
            .captures(after)
            .map(|caps| {
                let value = caps.get(1).map_or("", |m| m.as_str());
                let value = match self.field_marker.find(value) {
                    Some(m) => &value[..m.start()],
                    None => value,
                };
                normalize(value)
            })
            .unwrap_or_default();
        if display_name.is_empty() {
            let free_text = match self.field_marker.find(after) {
                Some(m) => &after[..m.start()],
                None => after,
            };
            let stripped = self.bracketed_span.replace_all(free_text, " ");
            let stripped = self.usr_token.replace_all(&stripped, " ");
            display_name = normalize(&stripped);
        }
        if display_name.is_empty() {
            if let Some(id) = &user_id {
                display_name = id.clone();
            }
        }

        ExtractedFields {
            display_name,
            user_id,
            placeholder,
        }
    }
}

fn compile(pattern: &str) -> Regex {
    // All patterns are fixed literals exercised by the unit tests.
    Regex::new(pattern).expect("invalid built-in pattern")
}

/// ASCII case-insensitive substring search returning a byte offset.
///
/// The event tokens are pure ASCII, so the returned offset is always a
/// valid char boundary in `haystack`.
fn find_ascii_ci(haystack: &str, needle: &str) -> Option<usize> {
    let h = haystack.as_bytes();
    let n = needle.as_bytes();
    if n.is_empty() || h.len() < n.len() {
        return None;
    }
    (0..=h.len() - n.len()).find(|&i| h[i..i + n.len()].eq_ignore_ascii_case(n))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> LineClassifier {
        LineClassifier::new()
    }

    // ==================== Precedence ====================

    #[test]
    fn classifies_room_left() {
        let event = classifier()
            .classify("2023.05.01 10:00:00 Log - [Behaviour] OnLeftRoom")
            .unwrap();
        assert_eq!(event, LogEvent::RoomLeft);
    }

    #[test]
    fn room_left_wins_over_other_markers() {
        let line = "[Behaviour] OnLeftRoom after OnPlayerJoined cleanup";
        assert_eq!(classifier().classify(line), Some(LogEvent::RoomLeft));
    }

    #[test]
    fn classifies_room_enter_with_world_and_instance() {
        let line = "[Behaviour] Joining Room: wrld_ba913a96-fac4-4048-a062-9aa5db092812:12345~region(jp)";
        match classifier().classify(line).unwrap() {
            LogEvent::RoomEnter {
                world_id,
                instance_id,
                ..
            } => {
                assert_eq!(world_id, "wrld_ba913a96-fac4-4048-a062-9aa5db092812");
                assert_eq!(instance_id.as_deref(), Some("12345~region(jp)"));
            }
            other => panic!("expected RoomEnter, got {other:?}"),
        }
    }

    #[test]
    fn instance_token_stops_at_comma() {
        let line = "instance wrld_aaaa1111-2222-3333-4444-555566667777:42, private";
        match classifier().classify(line).unwrap() {
            LogEvent::RoomEnter { instance_id, .. } => {
                assert_eq!(instance_id.as_deref(), Some("42"));
            }
            other => panic!("expected RoomEnter, got {other:?}"),
        }
    }

    #[test]
    fn verb_phrase_alone_is_a_transition() {
        match classifier().classify("Entering Room: The Great Pug").unwrap() {
            LogEvent::RoomEnter { world_id, .. } => assert!(world_id.is_empty()),
            other => panic!("expected RoomEnter, got {other:?}"),
        }
    }

    #[test]
    fn localized_room_term_counts_as_context() {
        let line = "ルーム wrld_ba913a96-fac4-4048-a062-9aa5db092812";
        assert!(matches!(
            classifier().classify(line),
            Some(LogEvent::RoomEnter { .. })
        ));
    }

    #[test]
    fn world_token_without_context_is_ignored() {
        let line = "asset bundle wrld_ba913a96-fac4-4048-a062-9aa5db092812 downloaded";
        assert_eq!(classifier().classify(line), None);
    }

    #[test]
    fn classifies_self_join() {
        let line = "2023.05.01 10:00:01 Log - [Behaviour] OnJoinedRoom";
        assert!(matches!(
            classifier().classify(line),
            Some(LogEvent::SelfJoin { .. })
        ));
    }

    #[test]
    fn classifies_player_join_with_name_and_id() {
        let line = "[Behaviour] OnPlayerJoined Alice (usr_12345678-abcd-ef00-1111-222233334444)";
        match classifier().classify(line).unwrap() {
            LogEvent::PlayerJoin {
                display_name,
                user_id,
                placeholder,
                ..
            } => {
                assert_eq!(display_name, "Alice");
                assert_eq!(
                    user_id.as_deref(),
                    Some("usr_12345678-abcd-ef00-1111-222233334444")
                );
                assert_eq!(placeholder, None);
            }
            other => panic!("expected PlayerJoin, got {other:?}"),
        }
    }

    #[test]
    fn classifies_player_left() {
        let line = "[Behaviour] OnPlayerLeft Alice (usr_1234)";
        match classifier().classify(line).unwrap() {
            LogEvent::PlayerLeft {
                display_name,
                user_id,
                ..
            } => {
                assert_eq!(display_name, "Alice");
                assert_eq!(user_id.as_deref(), Some("usr_1234"));
            }
            other => panic!("expected PlayerLeft, got {other:?}"),
        }
    }

    #[test]
    fn player_left_room_variant_still_matches_left() {
        let line = "[Behaviour] OnPlayerLeftRoom Bob";
        assert!(matches!(
            classifier().classify(line),
            Some(LogEvent::PlayerLeft { .. })
        ));
    }

    #[test]
    fn markers_without_behaviour_tag_are_ignored() {
        assert_eq!(classifier().classify("OnPlayerJoined Alice"), None);
    }

    #[test]
    fn unrelated_lines_produce_no_event() {
        assert_eq!(classifier().classify("[Network] ping 40ms"), None);
        assert_eq!(classifier().classify(""), None);
    }

    // ==================== Field extractor ====================

    #[test]
    fn extracts_placeholder_a_player() {
        let fields = classifier().extract_fields("[Behaviour] OnPlayerJoined a player", "OnPlayerJoined");
        assert_eq!(fields.placeholder.as_deref(), Some("a player"));
        assert_eq!(fields.user_id, None);
    }

    #[test]
    fn empty_remainder_counts_as_placeholder() {
        let fields = classifier().extract_fields("[Behaviour] OnJoinedRoom", "OnJoinedRoom");
        assert_eq!(fields.placeholder.as_deref(), Some(""));
        assert_eq!(fields.display_name, "");
    }

    #[test]
    fn real_name_is_not_a_placeholder() {
        let fields =
            classifier().extract_fields("[Behaviour] OnPlayerJoined Alice", "OnPlayerJoined");
        assert_eq!(fields.placeholder, None);
        assert_eq!(fields.display_name, "Alice");
    }

    #[test]
    fn explicit_display_name_key_value_wins() {
        let fields = classifier().extract_fields(
            "[Behaviour] OnPlayerJoined displayName=Alice userId=usr_9999",
            "OnPlayerJoined",
        );
        assert_eq!(fields.display_name, "Alice");
        assert_eq!(fields.user_id.as_deref(), Some("usr_9999"));
    }

    #[test]
    fn key_value_name_stops_before_trailing_pairs() {
        let fields = classifier().extract_fields(
            "[Behaviour] OnPlayerJoined name=Bob The Builder userId=usr_7 rank=vip",
            "OnPlayerJoined",
        );
        assert_eq!(fields.display_name, "Bob The Builder");
        assert_eq!(fields.user_id.as_deref(), Some("usr_7"));
    }

    #[test]
    fn parenthesized_user_id_beats_key_value() {
        let fields = classifier().extract_fields(
            "[Behaviour] OnPlayerJoined Alice (usr_aaaa) userId=usr_bbbb",
            "OnPlayerJoined",
        );
        assert_eq!(fields.user_id.as_deref(), Some("usr_aaaa"));
    }

    #[test]
    fn name_falls_back_to_user_id() {
        let fields =
            classifier().extract_fields("[Behaviour] OnPlayerJoined (usr_1234)", "OnPlayerJoined");
        assert_eq!(fields.display_name, "usr_1234");
        assert_eq!(fields.user_id.as_deref(), Some("usr_1234"));
    }

    #[test]
    fn bracketed_spans_are_stripped_from_fallback_name() {
        let fields = classifier().extract_fields(
            "[Behaviour] OnPlayerJoined Alice [mod] <vip> {eu}",
            "OnPlayerJoined",
        );
        assert_eq!(fields.display_name, "Alice");
    }

    #[test]
    fn key_value_residue_does_not_leak_into_fallback_name() {
        let fields = classifier().extract_fields(
            "[Behaviour] OnJoinedRoom userId=usr_me",
            "OnJoinedRoom",
        );
        assert_eq!(fields.display_name, "usr_me");
        assert_eq!(fields.user_id.as_deref(), Some("usr_me"));
    }

    #[test]
    fn token_lookup_is_case_insensitive() {
        let fields =
            classifier().extract_fields("[Behaviour] ONPLAYERJOINED Bob", "OnPlayerJoined");
        assert_eq!(fields.display_name, "Bob");
    }

    #[test]
    fn missing_token_yields_empty_fields() {
        let fields = classifier().extract_fields("no marker here", "OnPlayerJoined");
        assert_eq!(fields, ExtractedFields::default());
    }

    #[test]
    fn separator_run_after_token_is_stripped() {
        let fields =
            classifier().extract_fields("[Behaviour] OnPlayerJoined - Alice", "OnPlayerJoined");
        assert_eq!(fields.display_name, "Alice");
    }

    #[test]
    fn zero_width_characters_do_not_leak_into_names() {
        let fields = classifier().extract_fields(
            "[Behaviour] OnPlayerJoined Al\u{200B}ice (usr_1)",
            "OnPlayerJoined",
        );
        assert_eq!(fields.display_name, "Alice");
    }

    #[test]
    fn find_ascii_ci_basic() {
        assert_eq!(find_ascii_ci("xxOnPlayerLeftyy", "onplayerleft"), Some(2));
        assert_eq!(find_ascii_ci("short", "longer-needle"), None);
        assert_eq!(find_ascii_ci("abc", ""), None);
    }
}
