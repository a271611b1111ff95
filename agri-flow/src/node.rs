use serde::{Deserialize, Serialize};
use std::fmt;

/// Stages of the advisory workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    Initial,
    Classifying,
    Prescribing,
    Insurance,
    VendorQuery,
    ShowVendors,
    OrderBooking,
    Followup,
    Completed,
    Error,
}

impl Node {
    pub const ALL: [Node; 10] = [
        Node::Initial,
        Node::Classifying,
        Node::Prescribing,
        Node::Insurance,
        Node::VendorQuery,
        Node::ShowVendors,
        Node::OrderBooking,
        Node::Followup,
        Node::Completed,
        Node::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Node::Initial => "initial",
            Node::Classifying => "classifying",
            Node::Prescribing => "prescribing",
            Node::Insurance => "insurance",
            Node::VendorQuery => "vendor_query",
            Node::ShowVendors => "show_vendors",
            Node::OrderBooking => "order_booking",
            Node::Followup => "followup",
            Node::Completed => "completed",
            Node::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Node::Completed | Node::Error)
    }

    /// Node category used as the loop-detection scope.
    pub fn category(&self) -> &'static str {
        match self {
            Node::Initial | Node::Followup => "intake",
            Node::Classifying | Node::Prescribing => "diagnosis",
            Node::Insurance => "insurance",
            Node::VendorQuery | Node::ShowVendors | Node::OrderBooking => "vendor",
            Node::Completed | Node::Error => "terminal",
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
