use pcb_common::error::InputError;
use pcb_common::util::config::BackendKind;
use thiserror::Error;

/// Fatal routing-session errors. Unroutable nets are not errors; they are
/// reported inside [`RoutingOutcome`](crate::outcome::RoutingOutcome).
#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("malformed input: {0}")]
    Malformed(#[from] InputError),

    #[error("{0} backend is not available in this build")]
    BackendUnavailable(BackendKind),
}
