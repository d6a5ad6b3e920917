use serde::{Deserialize, Serialize};

/// Transport-neutral outcome of an operation. The transport layer maps these
/// to its own status codes without reinterpreting them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Created,
    ValidationError,
    AuthorizationMismatch,
    NotFound,
    Conflict,
    ServiceUnavailable,
    InternalError,
}

impl Outcome {
    /// Conventional HTTP status for the outcome.
    pub fn status_code(&self) -> u16 {
        match self {
            Outcome::Success => 200,
            Outcome::Created => 201,
            Outcome::ValidationError => 400,
            Outcome::AuthorizationMismatch => 403,
            Outcome::NotFound => 404,
            Outcome::Conflict => 409,
            Outcome::ServiceUnavailable => 503,
            Outcome::InternalError => 500,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success | Outcome::Created)
    }
}

/// Body of every response: `{message, data}` plus pagination links or an
/// error description where relevant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope<T> {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub links: Option<PageLinks>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// An outcome paired with its envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reply<T> {
    pub outcome: Outcome,
    pub envelope: Envelope<T>,
}

impl<T> Reply<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self::with_outcome(Outcome::Success, message, data)
    }

    pub fn created(message: impl Into<String>, data: T) -> Self {
        Self::with_outcome(Outcome::Created, message, data)
    }

    fn with_outcome(outcome: Outcome, message: impl Into<String>, data: T) -> Self {
        Self {
            outcome,
            envelope: Envelope {
                message: message.into(),
                data: Some(data),
                links: None,
                error: None,
            },
        }
    }

    pub fn failed(outcome: Outcome, message: impl Into<String>, error: String) -> Self {
        Self {
            outcome,
            envelope: Envelope {
                message: message.into(),
                data: None,
                links: None,
                error: Some(error),
            },
        }
    }

    pub fn with_links(mut self, links: PageLinks) -> Self {
        self.envelope.links = Some(links);
        self
    }
}

/// Reference to a neighbouring page.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageRef {
    pub page: u32,
    pub per_page: u32,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageLinks {
    pub next: Option<PageRef>,
    pub prev: Option<PageRef>,
}

impl PageLinks {
    /// Derive next/previous links from the total count and current position.
    pub fn compute(total: u64, page: u32, per_page: u32) -> Self {
        if per_page == 0 {
            return Self::default();
        }
        let last_page = total.div_ceil(u64::from(per_page));
        let next = (u64::from(page) < last_page).then(|| PageRef {
            page: page + 1,
            per_page,
        });
        let prev = (page > 1).then(|| PageRef {
            page: page - 1,
            per_page,
        });
        Self { next, prev }
    }
}

/// One page of a sorted query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
    pub links: PageLinks,
}
