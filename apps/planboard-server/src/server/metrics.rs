use std::{collections::HashMap, fmt::Write as _, hash::Hash, sync::Mutex};

use super::core::{MetricsState, METRICS_STATE};

pub(crate) fn metrics_state() -> &'static MetricsState {
    METRICS_STATE.get_or_init(MetricsState::default)
}

fn snapshot<K: Clone + Eq + Hash>(counters: &Mutex<HashMap<K, u64>>) -> Vec<(K, u64)> {
    counters
        .lock()
        .map_or_else(|_| Vec::new(), |guard| guard.clone().into_iter().collect())
}

fn increment<K: Eq + Hash>(counters: &Mutex<HashMap<K, u64>>, key: K) {
    if let Ok(mut counters) = counters.lock() {
        let entry = counters.entry(key).or_insert(0);
        *entry += 1;
    }
}

fn write_reason_counter(
    output: &mut String,
    name: &str,
    help: &str,
    mut entries: Vec<(&'static str, u64)>,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} counter");
    entries.sort_by_key(|(reason, _)| *reason);
    for (reason, value) in entries {
        let _ = writeln!(output, "{name}{{reason=\"{reason}\"}} {value}");
    }
}

pub(crate) fn render_metrics() -> String {
    let state = metrics_state();
    let mut output = String::new();

    write_reason_counter(
        &mut output,
        "planboard_auth_failures_total",
        "Count of auth-related failures by reason",
        snapshot(&state.auth_failures),
    );

    output.push_str(
        "# HELP planboard_rate_limit_hits_total Count of rate-limit rejections by surface\n",
    );
    output.push_str("# TYPE planboard_rate_limit_hits_total counter\n");
    let mut rate_entries = snapshot(&state.rate_limit_hits);
    rate_entries.sort_by_key(|((surface, reason), _)| (*surface, *reason));
    for ((surface, reason), value) in rate_entries {
        let _ = writeln!(
            output,
            "planboard_rate_limit_hits_total{{surface=\"{surface}\",reason=\"{reason}\"}} {value}"
        );
    }

    write_reason_counter(
        &mut output,
        "planboard_invitation_rejections_total",
        "Count of rejected invitation validations and acceptances by reason",
        snapshot(&state.invitation_rejections),
    );
    write_reason_counter(
        &mut output,
        "planboard_csrf_rejections_total",
        "Count of requests rejected by the origin check by reason",
        snapshot(&state.csrf_rejections),
    );
    write_reason_counter(
        &mut output,
        "planboard_setup_outcomes_total",
        "Count of first-run setup attempts by outcome",
        snapshot(&state.setup_outcomes),
    );

    output
}

pub(crate) fn record_auth_failure(reason: &'static str) {
    increment(&metrics_state().auth_failures, reason);
}

pub(crate) fn record_rate_limit_hit(surface: &'static str, reason: &'static str) {
    increment(&metrics_state().rate_limit_hits, (surface, reason));
}

pub(crate) fn record_invitation_rejection(reason: &'static str) {
    increment(&metrics_state().invitation_rejections, reason);
}

pub(crate) fn record_csrf_rejection(reason: &'static str) {
    increment(&metrics_state().csrf_rejections, reason);
}

pub(crate) fn record_setup_outcome(outcome: &'static str) {
    increment(&metrics_state().setup_outcomes, outcome);
}

#[cfg(test)]
mod tests {
    use super::{
        metrics_state, record_csrf_rejection, record_invitation_rejection, render_metrics,
    };

    fn counter(reason: &'static str) -> u64 {
        metrics_state()
            .invitation_rejections
            .lock()
            .expect("invitation metrics mutex should not be poisoned")
            .get(reason)
            .copied()
            .unwrap_or(0)
    }

    #[test]
    fn invitation_rejections_are_counted_per_reason() {
        let before = counter("metrics_test_reason");
        record_invitation_rejection("metrics_test_reason");
        record_invitation_rejection("metrics_test_reason");
        assert!(counter("metrics_test_reason") >= before + 2);
    }

    #[test]
    fn rendered_metrics_include_every_family() {
        record_csrf_rejection("metrics_test_origin");
        let rendered = render_metrics();
        for family in [
            "planboard_auth_failures_total",
            "planboard_rate_limit_hits_total",
            "planboard_invitation_rejections_total",
            "planboard_csrf_rejections_total",
            "planboard_setup_outcomes_total",
        ] {
            assert!(
                rendered.contains(&format!("# TYPE {family} counter")),
                "missing {family}"
            );
        }
        assert!(
            rendered.contains("planboard_csrf_rejections_total{reason=\"metrics_test_origin\"}")
        );
    }
}
