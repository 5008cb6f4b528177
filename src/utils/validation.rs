//! Input validation utilities

use once_cell::sync::Lazy;
use regex::Regex;
use validator::ValidationError;

/// Regex for validating scope identifiers (e.g. `read`, `transactions:write`)
static SCOPE_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_.:-]*$").unwrap());

/// Validate a single scope identifier
pub fn validate_scope(scope: &str) -> bool {
    !scope.is_empty() && scope.len() <= 100 && SCOPE_REGEX.is_match(scope)
}

/// Validator hook for scope lists on key create/update requests
pub fn validate_scopes(scopes: &[String]) -> Result<(), ValidationError> {
    for scope in scopes {
        if !validate_scope(scope) {
            let mut error = ValidationError::new("invalid_scope");
            error.message =
                Some("scopes must be lowercase identifiers like 'read' or 'transactions:write'".into());
            return Err(error);
        }
    }
    Ok(())
}
