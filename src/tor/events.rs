//! Asynchronous control-port events
//!
//! Only `HS_DESC` is interpreted here. Event bodies are the text following
//! `650 HS_DESC `, e.g.
//! `UPLOADED <service-id> <auth-type> <hsdir> [REASON=<reason>]`.

/// Event class carrying descriptor upload lifecycle events
pub const HS_DESC_EVENT: &str = "HS_DESC";

/// The lifecycle verb of an `HS_DESC` event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HsDescAction {
    Upload,
    Uploaded,
    Failed,
    /// REQUESTED, RECEIVED, CREATED, IGNORE, ...
    Other(String),
}

impl HsDescAction {
    fn parse(verb: &str) -> Self {
        match verb {
            "UPLOAD" => HsDescAction::Upload,
            "UPLOADED" => HsDescAction::Uploaded,
            "FAILED" => HsDescAction::Failed,
            other => HsDescAction::Other(other.to_string()),
        }
    }
}

/// A parsed `HS_DESC` event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HsDescEvent {
    pub action: HsDescAction,
    /// Onion address without the `.onion` suffix
    pub service_id: String,
    pub auth_type: String,
    /// HSDir identity (`$FINGERPRINT~nickname` or `UNKNOWN`)
    pub directory_id: String,
    pub reason: Option<String>,
}

impl HsDescEvent {
    /// Parse an event body. Returns `None` when required fields are missing.
    pub fn parse(body: &str) -> Option<Self> {
        let mut fields = body.split_whitespace();
        let action = HsDescAction::parse(fields.next()?);
        let service_id = fields.next()?.to_string();
        let auth_type = fields.next()?.to_string();
        let directory_id = fields.next()?.to_string();
        let reason = fields
            .find_map(|f| f.strip_prefix("REASON="))
            .map(|r| r.to_string());

        Some(Self {
            action,
            service_id,
            auth_type,
            directory_id,
            reason,
        })
    }
}
