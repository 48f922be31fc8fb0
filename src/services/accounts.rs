use chrono::{Duration, Utc};
use serde::Deserialize;
use tracing::{info, warn};

use crate::db::Database;
use crate::errors::{AppError, Result};
use crate::models::{Company, Role, Session, User};
use crate::services::crypto::CryptoService;
use crate::services::state::AppState;
use crate::utils::{new_id, now_rfc3339};

const MIN_PASSWORD_LEN: usize = 8;

/// Self-registration always founds a new company.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: String,
    pub company_name: String,
}

/// A company admin adding a colleague.
#[derive(Debug, Clone, Deserialize)]
pub struct MemberRequest {
    pub email: String,
    pub password: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Creates a company with the caller as its admin.
pub async fn register(state: &AppState, request: RegisterRequest) -> Result<User> {
    let email = validate_credentials(&request.email, &request.password)?;
    let company_name = request.company_name.trim().to_string();
    if company_name.is_empty() {
        return Err(AppError::BadRequest("company_name is required".to_string()));
    }
    state.with_db(|db| ensure_email_free(db, &email))?;

    let password_hash = hash_password(request.password).await?;
    let now = now_rfc3339();
    let company = Company {
        id: new_id(),
        name: company_name,
        default_approver_ids: Vec::new(),
        created_at: now.clone(),
    };
    let user = User {
        id: new_id(),
        email,
        name: request.name.trim().to_string(),
        company_id: company.id.clone(),
        role: Role::Admin,
        created_at: now,
    };
    state.with_db(|db| -> Result<()> {
        ensure_email_free(db, &user.email)?;
        db.insert_company(&company)?;
        db.insert_user(&user, &password_hash)?;
        Ok(())
    })?;
    info!(user_id = %user.id, company_id = %company.id, "company registered");
    Ok(user)
}

/// Adds a member to `company_id`. Only that company's admin may do so.
pub async fn add_member(state: &AppState, admin: &User, company_id: &str, request: MemberRequest) -> Result<User> {
    if !admin.administers(company_id) {
        return Err(AppError::Forbidden("only the company admin may add members".to_string()));
    }
    let email = validate_credentials(&request.email, &request.password)?;
    state.with_db(|db| ensure_email_free(db, &email))?;

    let password_hash = hash_password(request.password).await?;
    let user = User {
        id: new_id(),
        email,
        name: request.name.trim().to_string(),
        company_id: company_id.to_string(),
        role: Role::Member,
        created_at: now_rfc3339(),
    };
    state.with_db(|db| -> Result<()> {
        ensure_email_free(db, &user.email)?;
        db.insert_user(&user, &password_hash)?;
        Ok(())
    })?;
    info!(user_id = %user.id, company_id, added_by = %admin.id, "member added");
    Ok(user)
}

pub async fn login(state: &AppState, request: LoginRequest) -> Result<Session> {
    let email = request.email.trim().to_ascii_lowercase();
    let invalid = || AppError::Unauthorized("invalid email or password".to_string());

    let (user, password_hash) = state
        .with_db(|db| db.get_user_credentials(&email))?
        .ok_or_else(invalid)?;
    let password = request.password;
    let valid = blocking(move || CryptoService::verify_password(&password, &password_hash)).await?;
    if !valid {
        warn!(user_id = %user.id, "failed login");
        return Err(invalid());
    }

    let token = CryptoService::new_session_token()?;
    let expires_at = (Utc::now() + Duration::hours(state.config.session_ttl_hours)).to_rfc3339();
    state.with_db(|db| db.insert_session(&CryptoService::token_digest(&token), &user.id, &expires_at, &now_rfc3339()))?;
    info!(user_id = %user.id, "session opened");
    Ok(Session {
        token,
        user,
        expires_at,
    })
}

pub fn logout(db: &Database, token: &str) -> Result<()> {
    db.delete_session(&CryptoService::token_digest(token))?;
    Ok(())
}

pub fn authenticate(db: &Database, token: &str) -> Result<User> {
    db.get_session_user(&CryptoService::token_digest(token), &now_rfc3339())?
        .ok_or_else(|| AppError::Unauthorized("session is missing or expired".to_string()))
}

/// All companies, for platform admins only.
pub fn list_companies(db: &Database, user: &User) -> Result<Vec<Company>> {
    if !user.is_platform_admin() {
        return Err(AppError::Forbidden("platform admin access required".to_string()));
    }
    Ok(db.list_companies()?)
}

/// Grants the platform admin role. Reachable from the command line only.
pub fn promote_to_platform_admin(db: &Database, user_id: &str) -> Result<User> {
    if db.set_user_role(user_id, Role::PlatformAdmin)? == 0 {
        return Err(AppError::NotFound(format!("user {} not found", user_id)));
    }
    info!(user_id, "platform admin granted");
    db.get_user(user_id)?
        .ok_or_else(|| AppError::NotFound(format!("user {} not found", user_id)))
}

fn validate_credentials(email: &str, password: &str) -> Result<String> {
    let email = email.trim().to_ascii_lowercase();
    if !email.contains('@') {
        return Err(AppError::BadRequest("email is invalid".to_string()));
    }
    if password.len() < MIN_PASSWORD_LEN {
        return Err(AppError::BadRequest(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(email)
}

fn ensure_email_free(db: &Database, email: &str) -> Result<()> {
    if db.get_user_credentials(email)?.is_some() {
        return Err(AppError::Conflict(format!("{} is already registered", email)));
    }
    Ok(())
}

async fn hash_password(password: String) -> Result<String> {
    blocking(move || CryptoService::hash_password(&password)).await
}

/// PBKDF2 runs off the async workers and outside the database lock.
async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|err| AppError::Internal(format!("password task failed: {}", err)))?
}
