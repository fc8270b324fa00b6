use lazy_static::lazy_static;
use rand::Rng;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::auth::{
    dto::{TokenRequest, UserPayload},
    password::{hash_password, verify_password, verify_unknown_user},
    repo::UserRepo,
    repo_types::{NewUser, Token, User, UserChanges},
};
use crate::error::{AppError, FieldErrors, NON_FIELD_ERRORS};

pub const MAX_FIELD_LEN: usize = 255;
pub const MIN_PASSWORD_LEN: usize = 5;
const TOKEN_BYTES: usize = 20;

pub(crate) const MSG_REQUIRED: &str = "This field is required.";
pub(crate) const MSG_BLANK: &str = "This field may not be blank.";
pub(crate) const MSG_TOO_LONG: &str = "Ensure this field has no more than 255 characters.";
const MSG_BAD_EMAIL: &str = "Enter a valid email address.";
const MSG_EMAIL_TAKEN: &str = "user with this email already exists.";
const MSG_SHORT_PASSWORD: &str = "Ensure this field has at least 5 characters.";
const MSG_BAD_CREDENTIALS: &str = "Unable to authenticate with provided credentials.";

pub const MSG_NO_CREDENTIALS: &str = "Authentication credentials were not provided.";
pub const MSG_INVALID_TOKEN: &str = "Invalid token.";
pub const MSG_INACTIVE: &str = "User inactive or deleted.";

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Trims the address and lowercases the domain part; the local part keeps its case.
pub fn normalize_email(email: &str) -> String {
    let email = email.trim();
    match email.rsplit_once('@') {
        Some((local, domain)) => format!("{}@{}", local, domain.to_lowercase()),
        None => email.to_string(),
    }
}

fn check_email(errors: &mut FieldErrors, email: &str) {
    if email.is_empty() {
        errors.add("email", MSG_BLANK);
    } else if email.chars().count() > MAX_FIELD_LEN {
        errors.add("email", MSG_TOO_LONG);
    } else if !is_valid_email(email) {
        errors.add("email", MSG_BAD_EMAIL);
    }
}

fn check_password(errors: &mut FieldErrors, password: &str) {
    if password.is_empty() {
        errors.add("password", MSG_BLANK);
    } else if password.chars().count() < MIN_PASSWORD_LEN {
        errors.add("password", MSG_SHORT_PASSWORD);
    }
}

fn check_name(errors: &mut FieldErrors, name: &str) {
    if name.trim().is_empty() {
        errors.add("name", MSG_BLANK);
    } else if name.chars().count() > MAX_FIELD_LEN {
        errors.add("name", MSG_TOO_LONG);
    }
}

/// Creates and persists a user with a hashed password.
pub async fn create_user(
    users: &dyn UserRepo,
    email: &str,
    password: &str,
    name: &str,
) -> Result<User, AppError> {
    let email = normalize_email(email);
    if email.is_empty() {
        return Err(AppError::Validation(FieldErrors::single(
            "email",
            "User must have an email address",
        )));
    }
    let password_hash = hash_password(password)?;
    let user = users
        .insert_user(NewUser {
            email,
            password_hash,
            name: name.trim().to_string(),
            is_staff: false,
            is_superuser: false,
        })
        .await?;
    info!(user_id = user.id, email = %user.email, "user created");
    Ok(user)
}

pub async fn create_superuser(
    users: &dyn UserRepo,
    email: &str,
    password: &str,
) -> Result<User, AppError> {
    let user = create_user(users, email, password, "").await?;
    let changes = UserChanges {
        is_staff: Some(true),
        is_superuser: Some(true),
        ..Default::default()
    };
    let user = users
        .update_user(user.id, changes)
        .await?
        .ok_or_else(|| anyhow::anyhow!("superuser {} vanished after insert", user.id))?;
    info!(user_id = user.id, "superuser promoted");
    Ok(user)
}

/// Validates a sign-up payload and creates the user.
pub async fn register(users: &dyn UserRepo, payload: UserPayload) -> Result<User, AppError> {
    let mut errors = FieldErrors::new();
    let email = payload.email.as_deref().map(normalize_email);

    match &email {
        None => errors.add("email", MSG_REQUIRED),
        Some(email) => check_email(&mut errors, email),
    }
    match &payload.password {
        None => errors.add("password", MSG_REQUIRED),
        Some(password) => check_password(&mut errors, password),
    }
    match &payload.name {
        None => errors.add("name", MSG_REQUIRED),
        Some(name) => check_name(&mut errors, name),
    }
    if let Some(email) = email.as_deref().filter(|_| errors.get("email").is_none()) {
        if users.find_by_email(email).await?.is_some() {
            warn!(email = %email, "email already registered");
            errors.add("email", MSG_EMAIL_TAKEN);
        }
    }
    errors.finish()?;

    create_user(
        users,
        email.as_deref().unwrap_or_default(),
        payload.password.as_deref().unwrap_or_default(),
        payload.name.as_deref().unwrap_or_default(),
    )
    .await
}

/// Applies a `PUT` (`partial == false`) or `PATCH` to the caller's own account.
pub async fn update_me(
    users: &dyn UserRepo,
    user: &User,
    payload: UserPayload,
    partial: bool,
) -> Result<User, AppError> {
    let mut errors = FieldErrors::new();
    let email = payload.email.as_deref().map(normalize_email);

    if !partial {
        for (field, present) in [
            ("email", email.is_some()),
            ("password", payload.password.is_some()),
            ("name", payload.name.is_some()),
        ] {
            if !present {
                errors.add(field, MSG_REQUIRED);
            }
        }
    }
    if let Some(email) = &email {
        check_email(&mut errors, email);
        if errors.get("email").is_none() {
            if let Some(other) = users.find_by_email(email).await? {
                if other.id != user.id {
                    errors.add("email", MSG_EMAIL_TAKEN);
                }
            }
        }
    }
    if let Some(password) = &payload.password {
        check_password(&mut errors, password);
    }
    if let Some(name) = &payload.name {
        check_name(&mut errors, name);
    }
    errors.finish()?;

    let password_hash = match &payload.password {
        Some(password) => Some(hash_password(password)?),
        None => None,
    };
    let changes = UserChanges {
        email,
        password_hash,
        name: payload.name.map(|n| n.trim().to_string()),
        ..Default::default()
    };
    let updated = users
        .update_user(user.id, changes)
        .await?
        .ok_or(AppError::NotFound)?;
    info!(user_id = updated.id, "user updated");
    Ok(updated)
}

fn generate_token_key() -> String {
    let bytes: [u8; TOKEN_BYTES] = rand::thread_rng().gen();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Checks the credentials and returns the user's persistent token,
/// creating it on first login.
pub async fn issue_token(users: &dyn UserRepo, req: TokenRequest) -> Result<Token, AppError> {
    let mut errors = FieldErrors::new();
    let email = req.email.as_deref().map(normalize_email);
    match &email {
        None => errors.add("email", MSG_REQUIRED),
        Some(email) if email.is_empty() => errors.add("email", MSG_BLANK),
        Some(email) if !is_valid_email(email) => errors.add("email", MSG_BAD_EMAIL),
        Some(_) => {}
    }
    match &req.password {
        None => errors.add("password", MSG_REQUIRED),
        Some(password) if password.is_empty() => errors.add("password", MSG_BLANK),
        Some(_) => {}
    }
    errors.finish()?;

    let email = email.unwrap_or_default();
    let password = req.password.unwrap_or_default();
    let bad_credentials = || AppError::Validation(FieldErrors::single(NON_FIELD_ERRORS, MSG_BAD_CREDENTIALS));

    let Some(user) = users.find_by_email(&email).await? else {
        verify_unknown_user(&password);
        warn!(email = %email, "token requested for unknown email");
        return Err(bad_credentials());
    };
    if !verify_password(&password, &user.password_hash)? {
        warn!(user_id = user.id, "token requested with wrong password");
        return Err(bad_credentials());
    }
    if !user.is_active {
        warn!(user_id = user.id, "token requested for inactive user");
        return Err(bad_credentials());
    }

    let token = users.get_or_create_token(user.id, &generate_token_key()).await?;
    info!(user_id = user.id, "token issued");
    Ok(token)
}

/// Resolves an `Authorization` header value to its user.
/// Accepted schemes are `Bearer`, `bearer` and `Token`.
pub async fn resolve_token(users: &dyn UserRepo, header: Option<&str>) -> Result<User, AppError> {
    let header = header.ok_or(AppError::Unauthenticated(MSG_NO_CREDENTIALS))?;
    let key = ["Bearer ", "bearer ", "Token "]
        .iter()
        .find_map(|scheme| header.strip_prefix(scheme))
        .ok_or(AppError::Unauthenticated(MSG_NO_CREDENTIALS))?
        .trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return Err(AppError::Unauthenticated(MSG_INVALID_TOKEN));
    }

    let user = users
        .find_user_by_token(key)
        .await?
        .ok_or(AppError::Unauthenticated(MSG_INVALID_TOKEN))?;
    if !user.is_active {
        return Err(AppError::Unauthenticated(MSG_INACTIVE));
    }
    debug!(user_id = user.id, "token resolved");
    Ok(user)
}
