//! Switch sequence builder
//!
//! Collapses consecutive same-app events into sessions and emits one
//! [`SwitchEvent`] per boundary between distinct sessions. Single pass, one
//! step of lookahead.

use crate::types::{SwitchEvent, UsageEvent};

struct Session<'a> {
    app: &'a str,
    start_ms: i64,
    end_ms: i64,
}

/// Builds the switch sequence from sorted usage events
pub struct SwitchSequenceBuilder;

impl SwitchSequenceBuilder {
    /// Build switches from events sorted by start.
    ///
    /// `gap` is the dead time between sessions, clamped at zero when they
    /// overlap. `dwell` is the time since the switch into `from_app`.
    pub fn build(events: &[UsageEvent], bounce_threshold_ms: i64) -> Vec<SwitchEvent> {
        let mut switches = Vec::new();
        let mut iter = events.iter();

        let Some(first) = iter.next() else {
            return switches;
        };
        let mut session = Session {
            app: &first.app_id,
            start_ms: first.start.timestamp_millis(),
            end_ms: first.end.timestamp_millis(),
        };

        for event in iter {
            let start_ms = event.start.timestamp_millis();
            let end_ms = event.end.timestamp_millis();

            if event.app_id == session.app {
                session.end_ms = session.end_ms.max(end_ms);
                continue;
            }

            let gap_ms = (start_ms - session.end_ms).max(0);
            switches.push(SwitchEvent {
                from_app: session.app.to_string(),
                to_app: event.app_id.clone(),
                timestamp: event.start,
                gap_ms,
                dwell_ms: start_ms - session.start_ms,
                is_bounce_candidate: gap_ms < bounce_threshold_ms,
            });

            session = Session {
                app: &event.app_id,
                start_ms,
                end_ms,
            };
        }

        log::debug!(
            "Built {} switches from {} events",
            switches.len(),
            events.len()
        );
        switches
    }
}
