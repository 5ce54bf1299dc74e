use crate::CoreError;
use kiln_state::BuildStatus;

/// Validate one edge of the build state machine.
///
/// The only ways out of `failed` are back to `creating` (a fresh rebuild)
/// or to `provisioning` (a resume). `complete` is terminal.
pub fn validate_transition(from: BuildStatus, to: BuildStatus) -> Result<(), CoreError> {
    let valid = matches!(
        (from, to),
        (BuildStatus::Pending, BuildStatus::Creating)
            | (BuildStatus::Creating, BuildStatus::Provisioning)
            | (BuildStatus::Provisioning, BuildStatus::PostProcessing)
            | (BuildStatus::PostProcessing, BuildStatus::Complete)
            | (
                BuildStatus::Creating | BuildStatus::Provisioning | BuildStatus::PostProcessing,
                BuildStatus::Failed
            )
            | (BuildStatus::Failed, BuildStatus::Creating | BuildStatus::Provisioning)
    );

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_transitions() {
        assert!(validate_transition(BuildStatus::Pending, BuildStatus::Creating).is_ok());
        assert!(validate_transition(BuildStatus::Creating, BuildStatus::Provisioning).is_ok());
        assert!(
            validate_transition(BuildStatus::Provisioning, BuildStatus::PostProcessing).is_ok()
        );
        assert!(validate_transition(BuildStatus::PostProcessing, BuildStatus::Complete).is_ok());
        assert!(validate_transition(BuildStatus::Creating, BuildStatus::Failed).is_ok());
        assert!(validate_transition(BuildStatus::Provisioning, BuildStatus::Failed).is_ok());
        assert!(validate_transition(BuildStatus::PostProcessing, BuildStatus::Failed).is_ok());
        assert!(validate_transition(BuildStatus::Failed, BuildStatus::Creating).is_ok());
        assert!(validate_transition(BuildStatus::Failed, BuildStatus::Provisioning).is_ok());
    }

    #[test]
    fn invalid_transitions() {
        assert!(validate_transition(BuildStatus::Pending, BuildStatus::Complete).is_err());
        assert!(validate_transition(BuildStatus::Pending, BuildStatus::Failed).is_err());
        assert!(validate_transition(BuildStatus::Complete, BuildStatus::Provisioning).is_err());
        assert!(validate_transition(BuildStatus::Complete, BuildStatus::Failed).is_err());
        assert!(validate_transition(BuildStatus::Failed, BuildStatus::Complete).is_err());
        assert!(validate_transition(BuildStatus::Failed, BuildStatus::PostProcessing).is_err());
        assert!(validate_transition(BuildStatus::Provisioning, BuildStatus::Creating).is_err());
    }
}
