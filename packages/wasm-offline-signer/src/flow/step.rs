use serde::{Deserialize, Serialize};

/// Position of a signing session in the flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Step {
    #[default]
    None,
    SelectTarget,
    Form,
    WrapAndEstimate,
    Confirm,
    TransportToSigner,
    AwaitSignature,
    Submit,
    Done,
    Basket,
}

impl Step {
    /// Steps in which frames are shown or scanned
    pub fn is_transport(self) -> bool {
        matches!(self, Step::TransportToSigner | Step::AwaitSignature)
    }
}
