//! Removes contradictory labels from a classification and caps the count.

use tracing::info;

/// Default cap on labels applied to one email.
pub const MAX_LABELS: usize = 3;

/// Labels where at most one of each group may apply.
const MUTUALLY_EXCLUSIVE_GROUPS: &[&[&str]] = &[
    &[
        "Spam",
        "Personal",
        "Marketing",
        "Cold Email",
        "Newsletter",
        "Notification",
        "Receipt",
        "Calendar",
    ],
    &["To Reply", "Awaiting Reply", "Actioned", "FYI"],
    &["Urgent", "Important"],
];

const LABEL_CATEGORIES: &[(&str, &[&str])] = &[
    (
        "content_type",
        &[
            "Spam",
            "Personal",
            "Marketing",
            "Cold Email",
            "Newsletter",
            "Notification",
            "Receipt",
            "Calendar",
        ],
    ),
    ("action_status", &["To Reply", "Awaiting Reply", "Actioned", "FYI"]),
    (
        "business_type",
        &[
            "Quotes",
            "Job Inquiry",
            "Scheduling",
            "Follow-up",
            "Complaint",
            "Invoice",
            "Documents",
            "Support Ticket",
        ],
    ),
    ("priority", &["Urgent", "Important"]),
    ("relationship", &["Investor", "Supplier", "Networking"]),
    ("organizational", &["Archive"]),
];

/// More specific labels win conflicts.
const LABEL_PRIORITIES: &[(&str, i32)] = &[
    ("Spam", 10),
    ("Urgent", 9),
    ("Important", 8),
    ("Complaint", 7),
    ("To Reply", 6),
    ("Job Inquiry", 6),
    ("Quotes", 6),
    ("Follow-up", 5),
    ("Awaiting Reply", 4),
    ("Scheduling", 4),
    ("Documents", 4),
    ("Investor", 4),
    ("Personal", 3),
    ("Support Ticket", 3),
    ("Supplier", 3),
    ("Marketing", 2),
    ("Cold Email", 2),
    ("FYI", 2),
    ("Networking", 2),
    ("Actioned", 1),
    ("Archive", 1),
    ("Newsletter", 1),
    ("Notification", 1),
    ("Receipt", 1),
    ("Calendar", 1),
    ("Invoice", 1),
];

/// Conflict priority of a label; unknown labels rank 0.
pub fn label_priority(name: &str) -> i32 {
    LABEL_PRIORITIES
        .iter()
        .find(|(label, _)| label.eq_ignore_ascii_case(name))
        .map_or(0, |(_, p)| *p)
}

/// Category of a label, or `"other"`.
pub fn label_category(name: &str) -> &'static str {
    LABEL_CATEGORIES
        .iter()
        .find(|(_, labels)| labels.iter().any(|l| l.eq_ignore_ascii_case(name)))
        .map_or("other", |(category, _)| category)
}

fn exclusive_group(name: &str) -> Option<usize> {
    MUTUALLY_EXCLUSIVE_GROUPS
        .iter()
        .position(|group| group.iter().any(|l| l.eq_ignore_ascii_case(name)))
}

/// Filter classified label names.
///
/// 1. Within a mutually exclusive group keep the highest-priority label
///    (earliest wins ties).
/// 2. Keep at most one label per known category.
/// 3. Keep the `max_labels` highest-priority labels.
///
/// Blank and duplicate names are dropped. The result is ordered by priority
/// descending, then by input order.
pub fn validate_and_filter_labels(names: &[String], max_labels: usize) -> Vec<String> {
    let mut candidates: Vec<String> = Vec::new();
    for name in names.iter().map(|n| n.trim()).filter(|n| !n.is_empty()) {
        if !candidates.iter().any(|c| c.eq_ignore_ascii_case(name)) {
            candidates.push(name.to_string());
        }
    }

    let mut kept: Vec<String> = Vec::new();
    for label in candidates {
        let Some(group) = exclusive_group(&label) else {
            kept.push(label);
            continue;
        };
        match kept.iter().position(|k| exclusive_group(k) == Some(group)) {
            Some(idx) if label_priority(&label) > label_priority(&kept[idx]) => {
                info!(replaced = %kept[idx], with = %label, "Replaced conflicting label");
                kept[idx] = label;
            }
            Some(idx) => {
                info!(skipped = %label, conflicts_with = %kept[idx], "Skipped conflicting label");
            }
            None => kept.push(label),
        }
    }

    // Stable sort keeps input order among equal priorities.
    kept.sort_by_key(|l| std::cmp::Reverse(label_priority(l)));

    let mut seen_categories: Vec<&'static str> = Vec::new();
    let mut result = Vec::new();
    for label in kept {
        let category = label_category(&label);
        if category != "other" {
            if seen_categories.contains(&category) {
                info!(skipped = %label, category, "Category already has a label");
                continue;
            }
            seen_categories.push(category);
        }
        result.push(label);
    }

    if result.len() > max_labels {
        info!(max_labels, "Limiting applied labels");
        result.truncate(max_labels);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn exclusive_group_keeps_higher_priority() {
        assert_eq!(
            validate_and_filter_labels(&names(&["Marketing", "Spam"]), MAX_LABELS),
            vec!["Spam"]
        );
        assert_eq!(
            validate_and_filter_labels(&names(&["Urgent", "Important"]), MAX_LABELS),
            vec!["Urgent"]
        );
    }

    #[test]
    fn one_label_per_category() {
        assert_eq!(
            validate_and_filter_labels(&names(&["Quotes", "Complaint", "Urgent"]), MAX_LABELS),
            vec!["Urgent", "Complaint"]
        );
    }

    #[test]
    fn caps_count_by_priority() {
        let result = validate_and_filter_labels(
            &names(&["Archive", "Investor", "To Reply", "Urgent", "Custom"]),
            MAX_LABELS,
        );
        assert_eq!(result, vec!["Urgent", "To Reply", "Investor"]);
    }

    #[test]
    fn unknown_labels_pass_through_and_blanks_drop() {
        assert_eq!(
            validate_and_filter_labels(&names(&["Site Visit", " ", "Roadworks", "site visit"]), 5),
            vec!["Site Visit", "Roadworks"]
        );
        assert!(validate_and_filter_labels(&[], MAX_LABELS).is_empty());
    }

    #[test]
    fn lookup_helpers() {
        assert_eq!(label_priority("spam"), 10);
        assert_eq!(label_priority("Whatever"), 0);
        assert_eq!(label_category("Supplier"), "relationship");
        assert_eq!(label_category("Whatever"), "other");
    }
}
