//! Result type alias for Wardflow

use super::errors::WardflowError;

/// Result type alias for Wardflow operations
///
/// # Examples
///
/// ```
/// use wardflow::domain::result::Result;
/// use wardflow::domain::errors::WardflowError;
///
/// fn failing_function() -> Result<()> {
///     Err(WardflowError::Validation("Invalid input".to_string()))
/// }
/// assert!(failing_function().is_err());
/// ```
pub type Result<T> = std::result::Result<T, WardflowError>;
