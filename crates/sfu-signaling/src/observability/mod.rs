//! Observability for the signaling coordinator.
//!
//! Metric labels are bounded:
//! - `action`: 5 protocol actions plus `unknown`
//! - `status`: `success` or an error label from `SfuError::metric_label`
//! - `operation`: engine trait operations (~10 values)
//! - `event`: 3 engine event types
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `sfu_sessions_active` | Gauge | none | Registered peer sessions |
//! | `sfu_actions_total` | Counter | `action`, `status` | Client actions handled |
//! | `sfu_engine_call_duration_seconds` | Histogram | `operation`, `status` | Media engine latency |
//! | `sfu_teardown_errors_total` | Counter | `resource` | Failed closes during teardown |
//! | `sfu_engine_events_total` | Counter | `event` | Engine closure events applied |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::init_metrics_recorder;
