//! Scheduling failure taxonomy

use thiserror::Error;

pub const WEEKEND_MESSAGE: &str = "Atendimentos disponíveis apenas de segunda a sexta-feira.";
pub const BUSINESS_HOURS_MESSAGE: &str = "Horário de atendimento: 8h às 18h.";
pub const PAST_SLOT_MESSAGE: &str = "Não é possível agendar para uma data/hora passada.";
pub const END_BEFORE_START_MESSAGE: &str = "Horário final deve ser maior que o horário inicial.";

/// Failures of the appointment scheduler.
///
/// Validation and availability failures come from user input and are resolved
/// within the current turn; `Storage` is the only unexpected one.
#[derive(Debug, Error)]
pub enum SchedulingError {
    #[error("{0}")]
    Validation(String),
    #[error("Horário não disponível. Por favor, escolha outro horário.")]
    Unavailable,
    #[error("Agendamento não encontrado.")]
    NotFound,
    #[error("Este agendamento já foi cancelado.")]
    AlreadyCancelled,
    #[error("storage failure: {0}")]
    Storage(#[source] sqlx::Error),
}

impl SchedulingError {
    pub fn validation(message: impl Into<String>) -> SchedulingError {
        SchedulingError::Validation(message.into())
    }

    /// True for failures caused by the caller's input rather than the system.
    pub fn is_user_facing(&self) -> bool {
        !matches!(self, SchedulingError::Storage(_))
    }

    /// Text safe to show to the chat client.
    pub fn user_message(&self) -> String {
        match self {
            SchedulingError::Storage(_) => {
                "Desculpe, ocorreu um erro interno. Tente novamente mais tarde.".to_owned()
            }
            other => other.to_string(),
        }
    }
}

impl From<sqlx::Error> for SchedulingError {
    fn from(error: sqlx::Error) -> Self {
        match &error {
            // the live-slot index rejected a concurrent booking of the same hour
            sqlx::Error::Database(db) if db.is_unique_violation() => SchedulingError::Unavailable,
            _ => SchedulingError::Storage(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_messages() {
        assert_eq!(
            SchedulingError::Unavailable.user_message(),
            "Horário não disponível. Por favor, escolha outro horário."
        );
        assert_eq!(
            SchedulingError::validation(WEEKEND_MESSAGE).user_message(),
            WEEKEND_MESSAGE
        );
        let storage = SchedulingError::from(sqlx::Error::RowNotFound);
        assert!(!storage.is_user_facing());
        assert!(!storage.user_message().contains("RowNotFound"));
    }
}
