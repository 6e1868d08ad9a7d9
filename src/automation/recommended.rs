//! Recommended labels and actions for a freshly connected account.

use std::collections::HashMap;

use serde::Serialize;
use tracing::info;

use crate::automation::model::ActionFunction::{
    Archive, CreateTask, DraftReply, Forward, Notify, Schedule,
};
use crate::automation::model::{Action, ActionFunction, Label};
use crate::error::DatabaseError;
use crate::mail::model::Account;
use crate::store::Database;

struct ActionTemplate {
    name: &'static str,
    function: ActionFunction,
    instructions: &'static str,
    tool_description: &'static str,
}

struct LabelTemplate {
    name: &'static str,
    prompt: &'static str,
    instructions: &'static str,
    priority: i32,
    /// Functions linked to the label, in execution order.
    functions: &'static [ActionFunction],
}

const RECOMMENDED_ACTIONS: &[ActionTemplate] = &[
    ActionTemplate {
        name: "Draft Reply",
        function: DraftReply,
        instructions: "Draft a professional email reply addressing the sender's questions or requests. \
                       Use the account's writing style if available.",
        tool_description: "Create a draft email reply for review before sending",
    },
    ActionTemplate {
        name: "Create Task",
        function: CreateTask,
        instructions: "Create a follow-up task. Capture what needs doing, for whom, and any deadline \
                       mentioned in the email.",
        tool_description: "Create a follow-up task from the email",
    },
    ActionTemplate {
        name: "Schedule",
        function: Schedule,
        instructions: "Schedule a meeting, appointment, or follow-up. Extract date, time, and location \
                       from the email.",
        tool_description: "Schedule a meeting or appointment",
    },
    ActionTemplate {
        name: "Notify Team",
        function: Notify,
        instructions: "Let the team know about the email when it needs someone's attention soon.",
        tool_description: "Notify the team about the email",
    },
    ActionTemplate {
        name: "Archive Email",
        function: Archive,
        instructions: "Archive the email (remove from inbox). Use for emails that are informational \
                       or completed.",
        tool_description: "Archive email from inbox",
    },
    ActionTemplate {
        name: "Forward Email",
        function: Forward,
        instructions: "Forward the email to specified recipients. Parse recipient addresses from \
                       instructions (format: 'to: email1@example.com, email2@example.com').",
        tool_description: "Forward email to recipients",
    },
];

const RECOMMENDED_LABELS: &[LabelTemplate] = &[
    LabelTemplate {
        name: "Quotes",
        prompt: "Emails where a user is asking for a quote, pricing, or estimate. Includes requests \
                 for proposals, bids, or cost estimates.",
        instructions: "Extract key details: location, service type, scope of work, and any deadlines. \
                       Draft a professional quote response and create a task to prepare the quote. \
                       Set high priority if there's a deadline mentioned.",
        priority: 4,
        functions: &[DraftReply, CreateTask],
    },
    LabelTemplate {
        name: "Job Inquiry",
        prompt: "New job inquiries, project requests, or potential work opportunities. Emails from \
                 potential clients asking about services.",
        instructions: "Extract job details: location, service type, timeline, and contact information. \
                       Create a task. Draft a response acknowledging the inquiry and requesting any \
                       missing details. Set high priority for new business opportunities.",
        priority: 4,
        functions: &[DraftReply, CreateTask],
    },
    LabelTemplate {
        name: "Scheduling",
        prompt: "Any email related to scheduling, meetings, appointments, site visits, or calendar \
                 coordination.",
        instructions: "Extract date, time, location, and meeting purpose. Use the schedule action if \
                       available. Draft a confirmation response.",
        priority: 3,
        functions: &[DraftReply, Schedule],
    },
    LabelTemplate {
        name: "Complaint",
        prompt: "Customer complaints, issues, problems, or negative feedback that needs to be addressed.",
        instructions: "This is urgent and requires immediate attention. Draft a professional, \
                       empathetic response acknowledging the issue. Create a task to track \
                       resolution. Set highest priority (5).",
        priority: 5,
        functions: &[DraftReply, CreateTask],
    },
    LabelTemplate {
        name: "Invoice",
        prompt: "Invoices, billing, payment requests, or financial documents related to accounts \
                 payable or receivable.",
        instructions: "Extract invoice details: amount, due date, invoice number, and vendor or client. \
                       Note the due date and archive for records.",
        priority: 3,
        functions: &[DraftReply, Archive],
    },
    LabelTemplate {
        name: "Documents",
        prompt: "Contracts, agreements, terms and conditions, or other documents that require review, \
                 signature, or action.",
        instructions: "Extract parties, dates, obligations and deadlines. Create a task to track review \
                       or execution. Draft a response acknowledging receipt.",
        priority: 4,
        functions: &[DraftReply, CreateTask],
    },
    LabelTemplate {
        name: "Support Ticket",
        prompt: "Support requests, help requests, technical issues, or requests for assistance with \
                 products or services.",
        instructions: "Extract the issue details. Create a task to track resolution. Draft a helpful \
                       response with next steps or a request for more information.",
        priority: 3,
        functions: &[DraftReply, CreateTask],
    },
    LabelTemplate {
        name: "Newsletter",
        prompt: "Regular content from publications, industry newsletters, or subscription-based \
                 content. Usually informational, not requiring action.",
        instructions: "Archive. No action needed, this is informational content.",
        priority: 1,
        functions: &[DraftReply, Archive],
    },
    LabelTemplate {
        name: "Marketing",
        prompt: "Promotional emails about products, services, special offers, sales, or marketing \
                 campaigns.",
        instructions: "Archive. Typically no action needed unless it's a relevant business opportunity.",
        priority: 1,
        functions: &[DraftReply, Archive],
    },
    LabelTemplate {
        name: "Notification",
        prompt: "Alerts, status updates, or system notifications from services, apps, or platforms.",
        instructions: "Read and archive. Only take action if the notification indicates a problem.",
        priority: 1,
        functions: &[DraftReply, Archive],
    },
    LabelTemplate {
        name: "Receipt",
        prompt: "Purchase confirmations, payment receipts, order confirmations, or transaction records.",
        instructions: "Archive for records. No response required.",
        priority: 1,
        functions: &[DraftReply, Archive],
    },
    LabelTemplate {
        name: "Calendar",
        prompt: "Calendar invitations, meeting requests, event confirmations, or calendar-related \
                 automated messages.",
        instructions: "Extract meeting details: date, time, location, attendees. Use the schedule \
                       action if available.",
        priority: 2,
        functions: &[DraftReply, Schedule],
    },
    LabelTemplate {
        name: "Investor",
        prompt: "Emails from current or prospective investors.",
        instructions: "Draft a prompt, professional response and schedule any requested meeting.",
        priority: 4,
        functions: &[DraftReply, Schedule],
    },
    LabelTemplate {
        name: "Supplier",
        prompt: "Emails from suppliers, vendors, or business partners providing goods or services.",
        instructions: "Extract order details, delivery dates, or pricing. Respond to inquiries or \
                       confirmations. Archive invoices or receipts.",
        priority: 3,
        functions: &[DraftReply, Archive],
    },
    LabelTemplate {
        name: "Cold Email",
        prompt: "Unsolicited emails trying to sell a product or service, cold outreach, or sales \
                 pitches from unknown senders.",
        instructions: "Archive. No response needed unless it's a relevant business opportunity.",
        priority: 1,
        functions: &[DraftReply, Archive],
    },
    LabelTemplate {
        name: "Networking",
        prompt: "Professional networking emails, introductions, or referrals that aren't direct \
                 business inquiries.",
        instructions: "Draft a friendly, professional response. Schedule meetings if requested.",
        priority: 2,
        functions: &[DraftReply, Schedule],
    },
    LabelTemplate {
        name: "Spam",
        prompt: "Spam, junk mail, or unwanted emails that should be filtered out.",
        instructions: "Archive this email. No response needed.",
        priority: 1,
        functions: &[Archive],
    },
    LabelTemplate {
        name: "Personal",
        prompt: "Personal emails not related to business.",
        instructions: "Archive or leave as-is. No business action needed.",
        priority: 2,
        functions: &[DraftReply, Archive],
    },
];

/// Created and skipped counts for one entity kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SetupCounts {
    pub created: usize,
    pub skipped: usize,
}

/// Outcome of [`setup_account_automation`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SetupSummary {
    pub actions: SetupCounts,
    pub labels: SetupCounts,
    pub links_created: usize,
}

/// Create the recommended actions, then the recommended labels, linking
/// each label to its actions.
///
/// Existing actions and labels (matched by name, case-insensitively) are
/// left untouched, but missing links on existing labels are still added.
pub async fn setup_account_automation(
    store: &dyn Database,
    account: &Account,
) -> Result<SetupSummary, DatabaseError> {
    let mut summary = SetupSummary::default();

    let existing_actions = store.list_actions(Some(account.id)).await?;
    for template in RECOMMENDED_ACTIONS {
        if existing_actions
            .iter()
            .any(|a| a.name.eq_ignore_ascii_case(template.name))
        {
            summary.actions.skipped += 1;
            continue;
        }
        let action = Action::new(account.id, template.name, template.function)
            .with_instructions(template.instructions)
            .with_tool_description(template.tool_description);
        store.create_action(&action).await?;
        summary.actions.created += 1;
    }

    let mut by_function: HashMap<ActionFunction, Action> = HashMap::new();
    for action in store.list_actions(Some(account.id)).await? {
        by_function.entry(action.function).or_insert(action);
    }

    let existing_labels = store.list_labels(Some(account.id)).await?;
    for template in RECOMMENDED_LABELS {
        let label = match existing_labels
            .iter()
            .find(|l| l.name.eq_ignore_ascii_case(template.name))
        {
            Some(existing) => {
                summary.labels.skipped += 1;
                existing.clone()
            }
            None => {
                let label = Label::new(account.id, template.name)
                    .with_prompt(template.prompt)
                    .with_instructions(template.instructions)
                    .with_priority(template.priority);
                store.create_label(&label).await?;
                summary.labels.created += 1;
                label
            }
        };

        let linked = store.list_label_actions(label.id).await?;
        for (position, function) in template.functions.iter().enumerate() {
            let Some(action) = by_function.get(function) else {
                continue;
            };
            if linked.iter().any(|l| l.action.id == action.id) {
                continue;
            }
            store
                .link_action(label.id, action.id, position as i32 + 1)
                .await?;
            summary.links_created += 1;
        }
    }

    info!(
        account = %account.email,
        actions_created = summary.actions.created,
        labels_created = summary.labels.created,
        links_created = summary.links_created,
        "Recommended automation set up"
    );
    Ok(summary)
}
