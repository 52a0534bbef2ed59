//! Account validation.

use super::model::Account;
use super::uri::{Protocol, ServerUri};

/// Validation error for account configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Email address is empty.
    EmptyEmail,
    /// Email address format is invalid.
    InvalidEmail,
    /// Incoming URI does not parse or is not an IMAP URI.
    InvalidIncomingUri,
    /// Outgoing URI does not parse or is not an SMTP URI.
    InvalidOutgoingUri,
    /// Incoming server has no username or password.
    MissingIncomingCredentials,
    /// Inbox or private folder name is empty.
    EmptyFolderName,
    /// Backoff base is zero or above the ceiling.
    InvalidBackoff,
    /// IDLE refresh interval is zero.
    InvalidIdleRefresh,
}

impl ValidationError {
    /// Get human-readable error message.
    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            Self::EmptyEmail => "Email address is required",
            Self::InvalidEmail => "Invalid email address format",
            Self::InvalidIncomingUri => "Incoming server must be an imap:// URI",
            Self::InvalidOutgoingUri => "Outgoing server must be an smtp:// URI",
            Self::MissingIncomingCredentials => "Incoming server needs a username and password",
            Self::EmptyFolderName => "Folder names cannot be empty",
            Self::InvalidBackoff => "Push backoff must be positive and not above its ceiling",
            Self::InvalidIdleRefresh => "IDLE refresh interval must be positive",
        }
    }

    /// Get the field name this error relates to.
    #[must_use]
    pub const fn field(&self) -> &'static str {
        match self {
            Self::EmptyEmail | Self::InvalidEmail => "email",
            Self::InvalidIncomingUri | Self::MissingIncomingCredentials => "incoming_uri",
            Self::InvalidOutgoingUri => "outgoing_uri",
            Self::EmptyFolderName => "folders",
            Self::InvalidBackoff => "push_backoff",
            Self::InvalidIdleRefresh => "idle_refresh_secs",
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ValidationError {}

/// Result of validating an account.
pub type ValidationResult = Result<(), Vec<ValidationError>>;

/// Validate an account configuration.
///
/// Returns `Ok(())` if valid, or `Err(Vec<ValidationError>)` with all errors.
///
/// # Errors
///
/// Returns a vector of `ValidationError` if any fields are invalid.
pub fn validate_account(account: &Account) -> ValidationResult {
    let mut errors = Vec::new();

    if account.email.trim().is_empty() {
        errors.push(ValidationError::EmptyEmail);
    } else if !is_valid_email(&account.email) {
        errors.push(ValidationError::InvalidEmail);
    }

    match ServerUri::parse(&account.incoming_uri) {
        Ok(uri) if uri.scheme.protocol == Protocol::Imap => {
            if uri.username.is_empty() || uri.password.is_empty() {
                errors.push(ValidationError::MissingIncomingCredentials);
            }
        }
        _ => errors.push(ValidationError::InvalidIncomingUri),
    }
    if !matches!(
        ServerUri::parse(&account.outgoing_uri),
        Ok(uri) if uri.scheme.protocol == Protocol::Smtp
    ) {
        errors.push(ValidationError::InvalidOutgoingUri);
    }

    if account.inbox_folder.trim().is_empty() || account.private_folder.trim().is_empty() {
        errors.push(ValidationError::EmptyFolderName);
    }
    if account.push_backoff_base_secs == 0
        || account.push_backoff_base_secs > account.push_backoff_ceiling_secs
    {
        errors.push(ValidationError::InvalidBackoff);
    }
    if account.idle_refresh_secs == 0 {
        errors.push(ValidationError::InvalidIdleRefresh);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Basic email validation.
fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.trim().split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && domain.split('.').all(|label| !label.is_empty())
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_email() {
        assert!(is_valid_email("user@example.com"));
        assert!(is_valid_email("user.name@example.com"));
        assert!(is_valid_email("user@sub.example.com"));
    }

    #[test]
    fn test_invalid_email() {
        assert!(!is_valid_email(""));
        assert!(!is_valid_email("user"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("user@"));
        assert!(!is_valid_email("user@example"));
        assert!(!is_valid_email("user@@example.com"));
    }

    #[test]
    fn test_validate_empty_account() {
        let errors = validate_account(&Account::default()).unwrap_err();
        assert!(errors.contains(&ValidationError::EmptyEmail));
        assert!(errors.contains(&ValidationError::InvalidIncomingUri));
        assert!(errors.contains(&ValidationError::InvalidOutgoingUri));
    }

    #[test]
    fn test_swapped_uris_are_flagged() {
        let mut account = Account::new("me@example.com");
        account.incoming_uri = "smtp://PLAIN:me:pw@smtp.example.com".into();
        account.outgoing_uri = "imap://PLAIN:me:pw@imap.example.com".into();
        let errors = validate_account(&account).unwrap_err();
        assert_eq!(
            errors,
            vec![
                ValidationError::InvalidIncomingUri,
                ValidationError::InvalidOutgoingUri
            ]
        );
    }

    #[test]
    fn test_validate_complete_account() {
        let mut account = Account::new("me@example.com");
        account.incoming_uri = "imap+ssl+://PLAIN:me:pw@imap.example.com".into();
        account.outgoing_uri = "smtp+tls+://PLAIN:me:pw@smtp.example.com".into();
        assert!(validate_account(&account).is_ok());

        account.push_backoff_base_secs = account.push_backoff_ceiling_secs + 1;
        assert_eq!(
            validate_account(&account).unwrap_err(),
            vec![ValidationError::InvalidBackoff]
        );
    }
}
