//! Validation utilities

use crate::reconciliation::config::ReconciliationConfig;
use crate::types::*;

/// Validate that a company ID is usable as a tenant key
pub fn validate_company_id(company_id: &str) -> ReconResult<()> {
    if company_id.trim().is_empty() {
        return Err(ReconError::Validation(
            "Company ID cannot be empty".to_string(),
        ));
    }

    if company_id.len() > 64 {
        return Err(ReconError::Validation(
            "Company ID cannot exceed 64 characters".to_string(),
        ));
    }

    // Check for valid characters (alphanumeric, dashes, underscores)
    if !company_id
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ReconError::Validation(
            "Company ID can only contain alphanumeric characters, dashes, and underscores"
                .to_string(),
        ));
    }

    Ok(())
}

/// Validate an explicit record id restriction
pub fn validate_id_list(name: &str, ids: Option<&Vec<String>>) -> ReconResult<()> {
    let Some(ids) = ids else {
        return Ok(());
    };

    if ids.is_empty() {
        return Err(ReconError::Validation(format!(
            "{} cannot be an empty list",
            name
        )));
    }

    if ids.iter().any(|id| id.trim().is_empty()) {
        return Err(ReconError::Validation(format!(
            "{} cannot contain empty IDs",
            name
        )));
    }

    Ok(())
}

/// Validate the shape of start parameters; references are checked by the task manager
pub fn validate_task_params(params: &TaskParams) -> ReconResult<()> {
    validate_company_id(&params.company_id)?;

    match (&params.config_id, &params.pipeline_id) {
        (Some(_), Some(_)) => {
            return Err(ReconError::Validation(
                "Specify either config_id or pipeline_id, not both".to_string(),
            ))
        }
        (None, None) => {
            return Err(ReconError::Validation(
                "Either config_id or pipeline_id is required".to_string(),
            ))
        }
        _ => {}
    }

    if let (Some(from), Some(to)) = (params.date_from, params.date_to) {
        if from > to {
            return Err(ReconError::Validation(format!(
                "date_from {} is after date_to {}",
                from, to
            )));
        }
    }

    validate_id_list("bank_transaction_ids", params.bank_transaction_ids.as_ref())?;
    validate_id_list("journal_entry_ids", params.journal_entry_ids.as_ref())?;

    Ok(())
}

/// Validate that a config may be run for a company
pub fn validate_config_usable(config: &ReconciliationConfig, company_id: &str) -> ReconResult<()> {
    if !config.enabled {
        return Err(ReconError::Validation(format!(
            "Config '{}' is disabled",
            config.id
        )));
    }

    if !config.scope.permits_company(company_id) {
        return Err(ReconError::Validation(format!(
            "Config '{}' is not available to company '{}'",
            config.id, company_id
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciliation::config::ConfigScope;
    use chrono::NaiveDate;

    fn params() -> TaskParams {
        TaskParams {
            company_id: "acme".into(),
            config_id: Some("cfg".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_company_id_rules() {
        assert!(validate_company_id("acme-01").is_ok());
        assert!(validate_company_id("  ").is_err());
        assert!(validate_company_id("acme corp").is_err());
        assert!(validate_company_id(&"a".repeat(65)).is_err());
    }

    #[test]
    fn test_exactly_one_of_config_or_pipeline() {
        assert!(validate_task_params(&params()).is_ok());

        let both = TaskParams {
            pipeline_id: Some("p".into()),
            ..params()
        };
        assert!(matches!(validate_task_params(&both), Err(ReconError::Validation(_))));

        let neither = TaskParams {
            config_id: None,
            ..params()
        };
        assert!(validate_task_params(&neither).is_err());
    }

    #[test]
    fn test_date_range_must_be_ordered() {
        let reversed = TaskParams {
            date_from: NaiveDate::from_ymd_opt(2024, 2, 1),
            date_to: NaiveDate::from_ymd_opt(2024, 1, 1),
            ..params()
        };
        assert!(validate_task_params(&reversed).is_err());
    }

    #[test]
    fn test_empty_id_lists_are_rejected() {
        let empty = TaskParams {
            bank_transaction_ids: Some(Vec::new()),
            ..params()
        };
        assert!(validate_task_params(&empty).is_err());
    }

    #[test]
    fn test_config_usable() {
        let mut config = ReconciliationConfig::new("cfg", "Default");
        assert!(validate_config_usable(&config, "acme").is_ok());

        config.scope = ConfigScope::Company {
            company_id: "globex".into(),
        };
        assert!(validate_config_usable(&config, "acme").is_err());

        config.scope = ConfigScope::Global;
        config.enabled = false;
        assert!(validate_config_usable(&config, "acme").is_err());
    }
}
