//! Special template variables
//!
//! A small registry of generated values that templates can reference like
//! any other key. Date parts come from the injected clock so rendering is
//! reproducible; only the opener reaches the network.

use chrono::{DateTime, Utc};
use outreach_core::models::Lead;
use uuid::Uuid;

use crate::ai::OpenerGenerator;

/// Static opener used whenever generation is unavailable or fails.
pub const AI_OPENER_FALLBACK: &str = "Hi! Let's connect.";

/// Inputs for special-variable resolution.
pub struct SpecialContext<'a> {
    /// Base URL of the main application, with trailing slash.
    pub base_url: Option<&'a str>,
    pub lead_id: Option<Uuid>,
    /// Clock used for the date specials.
    pub now: DateTime<Utc>,
    pub opener: Option<&'a dyn OpenerGenerator>,
    pub lead: Option<&'a Lead>,
}

/// The recognized special keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialKey {
    Unsubscribe,
    CurrentDate,
    CurrentYear,
    CurrentMonth,
    CurrentDay,
    AiOpener,
}

impl SpecialKey {
    /// Case-insensitive lookup.
    pub fn parse(key: &str) -> Option<Self> {
        match key.to_lowercase().as_str() {
            "unsubscribe" => Some(SpecialKey::Unsubscribe),
            "currentdate" => Some(SpecialKey::CurrentDate),
            "currentyear" => Some(SpecialKey::CurrentYear),
            "currentmonth" => Some(SpecialKey::CurrentMonth),
            "currentday" => Some(SpecialKey::CurrentDay),
            "aiopener" => Some(SpecialKey::AiOpener),
            _ => None,
        }
    }
}

/// Resolve one special key. `None` falls through to the placeholder's
/// inline fallback.
pub async fn resolve(key: SpecialKey, ctx: &SpecialContext<'_>) -> Option<String> {
    match key {
        SpecialKey::Unsubscribe => {
            let base_url = ctx.base_url?;
            let lead_id = ctx.lead_id?;
            Some(format!("{base_url}unsubscribe/{lead_id}"))
        }
        SpecialKey::CurrentDate => Some(ctx.now.format("%B %-d, %Y").to_string()),
        SpecialKey::CurrentYear => Some(ctx.now.format("%Y").to_string()),
        SpecialKey::CurrentMonth => Some(ctx.now.format("%B").to_string()),
        SpecialKey::CurrentDay => Some(ctx.now.format("%-d").to_string()),
        SpecialKey::AiOpener => Some(generate_opener(ctx).await),
    }
}

async fn generate_opener(ctx: &SpecialContext<'_>) -> String {
    let (Some(opener), Some(lead)) = (ctx.opener, ctx.lead) else {
        return AI_OPENER_FALLBACK.to_string();
    };

    match opener.generate(lead).await {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(error = %e, "opener generation failed, using fallback");
            AI_OPENER_FALLBACK.to_string()
        }
    }
}
