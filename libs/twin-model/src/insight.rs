//! Insights derived from an actor's compacted output log
//!
//! Rule descriptions may embed `FAULTYTEXT(...)` and `NONFAULTYTEXT(...)`
//! markers. When an occurrence is committed the markers are resolved to
//! keep only the branch matching that occurrence's fault state; text on a
//! closed occurrence is never rewritten afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::output::OutputValues;

/// One closed fault/non-fault interval with its committed text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightOccurrence {
    pub is_faulted: bool,
    pub is_valid: bool,
    pub started: DateTime<Utc>,
    pub ended: DateTime<Utc>,
    pub text: String,
}

/// Fault summary for one rule instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Insight {
    pub rule_instance_id: String,
    pub is_faulty: bool,
    pub faulted_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub earliest_faulted_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_faulted_date: Option<DateTime<Utc>>,
    pub occurrences: Vec<InsightOccurrence>,
    pub recommendations: Vec<String>,
}

impl Insight {
    /// Derive the summary from a compacted output log. `description` and
    /// `recommendations` are marker templates resolved per occurrence.
    pub fn from_output(
        rule_instance_id: impl Into<String>,
        outputs: &OutputValues,
        description: &str,
        recommendations: &[String],
    ) -> Self {
        let mut occurrences = Vec::new();
        let mut earliest = None;
        let mut last = None;

        for row in outputs.points() {
            if row.faulted {
                if earliest.is_none() {
                    earliest = Some(row.start_time);
                }
                last = Some(row.end_time);
            }
            occurrences.push(InsightOccurrence {
                is_faulted: row.faulted,
                is_valid: row.is_valid,
                started: row.start_time,
                ended: row.end_time,
                text: if row.is_valid {
                    resolve_markers(description, row.faulted)
                } else {
                    row.text.clone()
                },
            });
        }

        let is_faulty = outputs.is_faulted();
        Self {
            rule_instance_id: rule_instance_id.into(),
            is_faulty,
            faulted_count: outputs.faulted_count,
            earliest_faulted_date: outputs.first_faulted_time.or(earliest),
            last_faulted_date: last,
            occurrences,
            recommendations: recommendations
                .iter()
                .map(|r| resolve_markers(r, is_faulty))
                .collect(),
        }
    }
}

/// Resolve FAULTYTEXT/NONFAULTYTEXT markers for one fault state. Marker
/// bodies may contain nested parentheses; an unbalanced marker is left
/// verbatim rather than treated as an error.
pub fn resolve_markers(template: &str, faulted: bool) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some((prefix, marker, after)) = next_marker(rest) {
        out.push_str(prefix);
        match balanced_body(after) {
            Some((body, tail)) => {
                let keep = match marker {
                    Marker::Faulty => faulted,
                    Marker::NonFaulty => !faulted,
                };
                if keep {
                    out.push_str(body);
                }
                rest = tail;
            }
            None => {
                // unbalanced, keep the marker text as written
                out.push_str(marker.as_str());
                out.push('(');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

#[derive(Clone, Copy)]
enum Marker {
    Faulty,
    NonFaulty,
}

impl Marker {
    fn as_str(self) -> &'static str {
        match self {
            Marker::Faulty => "FAULTYTEXT",
            Marker::NonFaulty => "NONFAULTYTEXT",
        }
    }
}

/// Split at the first marker: (text before, marker, text after the open paren)
fn next_marker(s: &str) -> Option<(&str, Marker, &str)> {
    let non = s.find("NONFAULTYTEXT(");
    // FAULTYTEXT is a suffix of NONFAULTYTEXT, skip hits inside one
    let fau = s
        .match_indices("FAULTYTEXT(")
        .map(|(i, _)| i)
        .find(|&i| non != Some(i.wrapping_sub(3)));

    match (non, fau) {
        (Some(n), Some(f)) if n < f => {
            Some((&s[..n], Marker::NonFaulty, &s[n + "NONFAULTYTEXT(".len()..]))
        }
        (_, Some(f)) => Some((&s[..f], Marker::Faulty, &s[f + "FAULTYTEXT(".len()..])),
        (Some(n), None) => Some((&s[..n], Marker::NonFaulty, &s[n + "NONFAULTYTEXT(".len()..])),
        (None, None) => None,
    }
}

/// Given text starting just after an open paren, return (body, rest after
/// the matching close paren), or None when unbalanced
fn balanced_body(s: &str) -> Option<(&str, &str)> {
    let mut depth = 1usize;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some((&s[..i], &s[i + 1..]));
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{InvalidCategory, OutputValue};
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn faulted_keeps_faulty_branch() {
        let t = "Zone is FAULTYTEXT(too hot)NONFAULTYTEXT(fine)";
        assert_eq!(resolve_markers(t, true), "Zone is too hot");
        assert_eq!(resolve_markers(t, false), "Zone is fine");
    }

    #[test]
    fn nested_parens_stay_balanced() {
        let t = "FAULTYTEXT(deviation (abs) exceeded (see chart))";
        assert_eq!(
            resolve_markers(t, true),
            "deviation (abs) exceeded (see chart)"
        );
        assert_eq!(resolve_markers(t, false), "");
    }

    #[test]
    fn unbalanced_marker_left_verbatim() {
        let t = "prefix FAULTYTEXT(never closed";
        assert_eq!(resolve_markers(t, true), t);
        assert_eq!(resolve_markers(t, false), t);
    }

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(resolve_markers("no markers here", true), "no markers here");
    }

    #[test]
    fn insight_summarizes_fault_intervals() {
        let mut log = OutputValues::new();
        log.add(OutputValue::valid(at(0), at(10), false));
        log.add(OutputValue::valid(at(10), at(20), true));
        log.add(OutputValue::valid(at(20), at(30), false));
        log.add(OutputValue::valid(at(30), at(40), true));

        let insight = Insight::from_output(
            "rule1_ahu-1",
            &log,
            "FAULTYTEXT(hot)NONFAULTYTEXT(ok)",
            &[],
        );
        assert!(insight.is_faulty);
        assert_eq!(insight.faulted_count, 2);
        assert_eq!(insight.earliest_faulted_date, Some(at(10)));
        assert_eq!(insight.last_faulted_date, Some(at(40)));
        assert_eq!(insight.occurrences.len(), 4);
        assert_eq!(insight.occurrences[1].text, "hot");
        assert_eq!(insight.occurrences[2].text, "ok");
    }

    #[test]
    fn invalid_rows_keep_their_diagnostic_text() {
        let mut log = OutputValues::new();
        log.add(OutputValue::invalid(
            at(0),
            at(10),
            InvalidCategory::MissingValue,
            "no samples yet",
        ));
        let insight = Insight::from_output("rule1_ahu-1", &log, "FAULTYTEXT(hot)", &[]);
        assert_eq!(insight.occurrences[0].text, "no samples yet");
        assert!(!insight.occurrences[0].is_valid);
    }
}
