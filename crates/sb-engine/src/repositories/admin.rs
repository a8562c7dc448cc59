use chrono::Utc;
use sb_core::{
    from_document, to_document, Admin, AppError, Collection, Connection, Connector, Filter, NewAdmin, Result,
};
use serde_json::{json, Value};

use super::decode_one;
use crate::pool::Pool;

/// Login addresses remembered per admin.
pub const MAX_LOGIN_IPS: usize = 10;

const USERNAME_FIELD: &str = "username";
const UPDATED_AT_FIELD: &str = "updatedAt";
/// Rounds of read-modify-write before a contended login gives up.
const LOGIN_ATTEMPTS: usize = 5;

/// Staff accounts. Passwords arrive already hashed.
pub struct AdminRepository<C: Connector> {
    pool: Pool<C>,
}

impl<C: Connector> Clone for AdminRepository<C> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
        }
    }
}

impl<C: Connector> AdminRepository<C> {
    pub fn new(pool: Pool<C>) -> Self {
        Self { pool }
    }

    #[tracing::instrument(skip_all, fields(username = %draft.username))]
    pub async fn create(&self, draft: NewAdmin) -> Result<Admin> {
        let conn = self.pool.acquire().await?;
        let filter = Filter::new().eq(USERNAME_FIELD, draft.username.as_str());
        if conn.count(Collection::Admin, &filter).await? > 0 {
            return Err(AppError::Validation(format!("admin {} already exists", draft.username)));
        }

        let admin = Admin::new(draft);
        conn.insert_one(Collection::Admin, to_document(&admin)?).await?;
        Ok(admin)
    }

    pub async fn find_by_username(&self, username: &str) -> Result<Option<Admin>> {
        let conn = self.pool.acquire().await?;
        decode_one(
            conn.find_one(Collection::Admin, &Filter::new().eq(USERNAME_FIELD, username))
                .await?,
        )
    }

    /// Records a successful login from `ip` and returns the updated account.
    ///
    /// The history is rewritten only if `updatedAt` still holds the value that
    /// was read, so concurrent logins retry instead of dropping each other's
    /// addresses.
    #[tracing::instrument(skip(self))]
    pub async fn record_login(&self, username: &str, ip: &str) -> Result<Admin> {
        let filter = Filter::new().eq(USERNAME_FIELD, username);
        let conn = self.pool.acquire().await?;

        for _ in 0..LOGIN_ATTEMPTS {
            let doc = conn
                .find_one(Collection::Admin, &filter)
                .await?
                .ok_or_else(|| AppError::not_found_or_forbidden("admin", username))?;
            let seen = doc.get(UPDATED_AT_FIELD).cloned().unwrap_or(Value::Null);
            let mut admin: Admin = from_document(doc)?;

            admin.last_login_ips.retain(|known| known != ip);
            admin.last_login_ips.push(ip.to_string());
            if admin.last_login_ips.len() > MAX_LOGIN_IPS {
                let excess = admin.last_login_ips.len() - MAX_LOGIN_IPS;
                admin.last_login_ips.drain(..excess);
            }
            admin.last_login_ip = Some(ip.to_string());
            admin.updated_at = Utc::now();

            let set = to_document(&json!({
                "lastLoginIp": admin.last_login_ip,
                "lastLoginIps": admin.last_login_ips,
                "updatedAt": admin.updated_at,
            }))?;
            let unchanged = filter.clone().eq(UPDATED_AT_FIELD, seen);
            if conn.update_one(Collection::Admin, &unchanged, set).await? > 0 {
                return Ok(admin);
            }
            tracing::debug!("admin changed concurrently, retrying login update");
        }

        Err(AppError::TransactionAborted(format!(
            "login history for {username} kept changing"
        )))
    }
}
