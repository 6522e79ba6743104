use rand::RngCore;
use scheduler_common::{Result, SchedulerError};

pub const DEFAULT_OUTPUT_TOKENS_EXPECTED: u64 = 50;
pub const DEFAULT_PRIORITY_BID: u64 = 1;

/// An inference request admitted (or rejected) at the gatekeeper. Immutable
/// once constructed — effective priority is snapshotted here, not recomputed
/// later.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub request_id: String,
    pub tenant_id: String,
    pub prompt_tokens: u64,
    pub output_tokens_expected: u64,
    pub priority_bid: u64,
    pub arrival_time: f64,
}

impl Request {
    /// Validates and constructs a `Request`. `arrival_time` is the caller's
    /// monotonic clock reading taken at admission.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        request_id: Option<String>,
        tenant_id: impl Into<String>,
        prompt_tokens: u64,
        output_tokens_expected: Option<u64>,
        priority_bid: Option<u64>,
        arrival_time: f64,
    ) -> Result<Self> {
        let tenant_id = tenant_id.into();
        if tenant_id.is_empty() {
            return Err(SchedulerError::InvalidRequest("tenant_id must not be empty".into()));
        }
        if prompt_tokens == 0 {
            return Err(SchedulerError::InvalidRequest("prompt_tokens must be > 0".into()));
        }
        let output_tokens_expected = output_tokens_expected.unwrap_or(DEFAULT_OUTPUT_TOKENS_EXPECTED);
        if output_tokens_expected == 0 {
            return Err(SchedulerError::InvalidRequest(
                "output_tokens_expected must be > 0".into(),
            ));
        }

        Ok(Self {
            request_id: request_id.unwrap_or_else(generate_request_id),
            tenant_id,
            prompt_tokens,
            output_tokens_expected,
            priority_bid: priority_bid.unwrap_or(DEFAULT_PRIORITY_BID),
            arrival_time,
        })
    }
}

/// Synthesizes a UUID-v4-shaped identifier without pulling in a dedicated
/// uuid dependency — the reference workspace already carries `rand` for
/// sampling, so it is reused here for the bit source.
fn generate_request_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes[6] = (bytes[6] & 0x0f) | 0x40; // version 4
    bytes[8] = (bytes[8] & 0x3f) | 0x80; // variant 1

    format!(
        "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
        bytes[0], bytes[1], bytes[2], bytes[3],
        bytes[4], bytes[5],
        bytes[6], bytes[7],
        bytes[8], bytes[9],
        bytes[10], bytes[11], bytes[12], bytes[13], bytes[14], bytes[15],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_prompt_tokens() {
        let err = Request::new(None, "tenant_a", 0, None, None, 0.0).unwrap_err();
        assert_eq!(
            err,
            SchedulerError::InvalidRequest("prompt_tokens must be > 0".into())
        );
    }

    #[test]
    fn rejects_empty_tenant_id() {
        assert!(Request::new(None, "", 10, None, None, 0.0).is_err());
    }

    #[test]
    fn defaults_output_tokens_and_priority() {
        let req = Request::new(None, "tenant_a", 10, None, None, 0.0).unwrap();
        assert_eq!(req.output_tokens_expected, DEFAULT_OUTPUT_TOKENS_EXPECTED);
        assert_eq!(req.priority_bid, DEFAULT_PRIORITY_BID);
        assert!(!req.request_id.is_empty());
    }

    #[test]
    fn generated_ids_are_distinct() {
        let a = generate_request_id();
        let b = generate_request_id();
        assert_ne!(a, b);
    }
}
