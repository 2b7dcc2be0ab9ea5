//! Report rendering: a plain-text summary for terminals and a structured
//! JSON document for scripting, both built from the same `Store` reads
//! (§6 `report`, §10.5).

use kbisect_core::{Iteration, SessionStatus, Verdict};
use kbisect_store::SessionSummary;

fn verdict_label(v: Verdict) -> &'static str {
    match v {
        Verdict::Good => "good",
        Verdict::Bad => "bad",
        Verdict::Skip => "skip",
        Verdict::Pending => "pending",
    }
}

fn status_label(s: SessionStatus) -> &'static str {
    match s {
        SessionStatus::Running => "running",
        SessionStatus::Halted => "halted",
        SessionStatus::Completed => "completed",
        SessionStatus::Aborted => "aborted",
    }
}

pub fn render_text(summary: &SessionSummary, iterations: &[Iteration]) -> String {
    let s = &summary.session;
    let mut out = String::new();
    out.push_str(&format!("session {}\n", s.id));
    out.push_str(&format!("  range:      {}..{}\n", s.good_ref, s.bad_ref));
    out.push_str(&format!("  status:     {}\n", status_label(s.status)));
    if let Some(first_bad) = &s.first_bad {
        out.push_str(&format!("  first bad:  {first_bad}\n"));
    }
    out.push_str(&format!(
        "  iterations: {} (good {}, bad {}, skip {}, pending {})\n",
        summary.iteration_count,
        summary.good_count,
        summary.bad_count,
        summary.skip_count,
        summary.pending_count
    ));
    out.push('\n');

    for it in iterations {
        out.push_str(&format!(
            "  #{:<3} {} {:<8} {}\n",
            it.index,
            &it.sha[..it.sha.len().min(12)],
            verdict_label(it.verdict),
            it.message.lines().next().unwrap_or("")
        ));
        if let Some(err) = &it.error_summary {
            out.push_str(&format!("        {err}\n"));
        }
    }

    out
}

pub fn render_json(summary: &SessionSummary, iterations: &[Iteration]) -> serde_json::Value {
    let s = &summary.session;
    serde_json::json!({
        "session_id": s.id,
        "good_ref": s.good_ref,
        "bad_ref": s.bad_ref,
        "status": status_label(s.status),
        "first_bad": s.first_bad,
        "iteration_count": summary.iteration_count,
        "good_count": summary.good_count,
        "bad_count": summary.bad_count,
        "skip_count": summary.skip_count,
        "pending_count": summary.pending_count,
        "iterations": iterations.iter().map(|it| serde_json::json!({
            "index": it.index,
            "sha": it.sha,
            "message": it.message,
            "verdict": verdict_label(it.verdict),
            "error_summary": it.error_summary,
        })).collect::<Vec<_>>(),
    })
}
