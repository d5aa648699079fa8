use crate::utils::IsTransient;

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("broker connection is not established")]
    Disconnected,

    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),

    #[error("broker did not confirm message {0}")]
    Nacked(String),

    #[error("invalid listener: {0}")]
    InvalidListener(String),

    #[error("broker is closed")]
    Closed,
}

impl BrokerError {
    /// The channel or connection under an operation went away.
    pub fn is_closed_channel(&self) -> bool {
        matches!(
            self,
            Self::Amqp(
                lapin::Error::InvalidChannelState(_) | lapin::Error::InvalidConnectionState(_)
            )
        )
    }
}

impl IsTransient for BrokerError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Disconnected | Self::Nacked(_) => true,
            Self::Amqp(lapin::Error::IOError(_)) => true,
            Self::Amqp(_) => self.is_closed_channel(),
            Self::InvalidListener(_) | Self::Closed => false,
        }
    }
}
