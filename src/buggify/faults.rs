//! Fault catalog
//!
//! Every injection site names one of these IDs so probabilities can be tuned
//! per fault and statistics can be reported per fault.

pub mod transport {
    /// Upstream refuses the connection
    pub const CONNECT_FAIL: &str = "transport.connect_fail";
    /// Upstream rejects the credential (401/403)
    pub const AUTH_REJECT: &str = "transport.auth_reject";
    /// Open stream is severed mid-flight
    pub const STREAM_DROP: &str = "transport.stream_drop";
    /// Frame arrives with an unparseable payload
    pub const MALFORMED_FRAME: &str = "transport.malformed_frame";
}

pub mod delivery {
    /// Target answers with an error
    pub const TARGET_ERROR: &str = "delivery.target_error";
    /// Target never answers within the deadline
    pub const TARGET_TIMEOUT: &str = "delivery.target_timeout";
    /// Target disappeared between discovery and delivery
    pub const TARGET_GONE: &str = "delivery.target_gone";
    /// Target acknowledges with `success: false`
    pub const TARGET_REJECT: &str = "delivery.target_reject";
}

pub const ALL_FAULTS: &[&str] = &[
    transport::CONNECT_FAIL,
    transport::AUTH_REJECT,
    transport::STREAM_DROP,
    transport::MALFORMED_FRAME,
    delivery::TARGET_ERROR,
    delivery::TARGET_TIMEOUT,
    delivery::TARGET_GONE,
    delivery::TARGET_REJECT,
];
