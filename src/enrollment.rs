//! Narrow interface onto the overlay daemon's onboarding/enrollment state
//! machine. Sentinel's core never drives enrollment itself — it only asks
//! "are we joined" once per cycle and reacts to the answer.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    NotJoined,
    LoginRequired,
    Joining,
    Joined,
    AuthFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    None,
    Retryable,
    NonRetryable,
}

#[derive(Debug, Clone)]
pub struct Status {
    pub state: State,
    pub mode: String,
    pub node_id: String,
    pub hostname: String,
    pub login_url: Option<String>,
}

impl Status {
    pub fn joined(&self) -> bool {
        self.state == State::Joined
    }
}

#[derive(Debug, thiserror::Error)]
#[error("enrollment error ({class:?}): {message}")]
pub struct EnrollmentError {
    pub class: ErrorClass,
    pub message: String,
}

impl EnrollmentError {
    pub fn is_retryable(&self) -> bool {
        self.class == ErrorClass::Retryable
    }
}

/// The enrollment collaborator's contract: confirm join state before a
/// cycle runs, and report the last-known status on demand (for `sentinel
/// status`).
pub trait Enrollment: Send {
    fn ensure_joined(&mut self) -> impl Future<Output = Result<Status, EnrollmentError>> + Send;
    fn last_status(&self) -> Status;
}

/// The only shipped implementation: always reports an already-joined node.
/// The real onboarding state machine against the overlay daemon is out of
/// scope for Sentinel's core (see module docs); a deployment wiring in a
/// real daemon client implements [`Enrollment`] itself.
pub struct AlreadyJoined {
    node_id: String,
    hostname: String,
}

impl AlreadyJoined {
    pub fn new(node_id: impl Into<String>, hostname: impl Into<String>) -> Self {
        AlreadyJoined { node_id: node_id.into(), hostname: hostname.into() }
    }
}

impl Enrollment for AlreadyJoined {
    async fn ensure_joined(&mut self) -> Result<Status, EnrollmentError> {
        Ok(self.last_status())
    }

    fn last_status(&self) -> Status {
        Status {
            state: State::Joined,
            mode: "stub".to_string(),
            node_id: self.node_id.clone(),
            hostname: self.hostname.clone(),
            login_url: None,
        }
    }
}
