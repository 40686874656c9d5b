// ABOUTME: User account database operations
// ABOUTME: Registration, lockout bookkeeping, and password/epoch updates
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP Gateway Contributors

use super::Database;
use crate::errors::{AppError, AppResult};
use crate::models::User;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

impl Database {
    /// Create a new user
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if the email is already registered, or an error if
    /// the database operation fails.
    pub async fn create_user(&self, user: &User) -> AppResult<()> {
        if self.get_user(&user.email).await?.is_some() {
            return Err(AppError::conflict(format!(
                "User {} already exists",
                user.email
            )));
        }

        sqlx::query(
            r"
            INSERT INTO users (
                email, full_name, password_hash, is_platform_admin,
                is_email_verified, failed_logins, locked_until, token_epoch, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ",
        )
        .bind(&user.email)
        .bind(&user.full_name)
        .bind(&user.password_hash)
        .bind(user.is_platform_admin)
        .bind(user.is_email_verified)
        .bind(user.failed_logins)
        .bind(user.locked_until)
        .bind(user.token_epoch)
        .bind(user.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to create user: {e}")))?;

        Ok(())
    }

    /// Get a user by email
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails
    pub async fn get_user(&self, email: &str) -> AppResult<Option<User>> {
        let row = sqlx::query(
            r"
            SELECT email, full_name, password_hash, is_platform_admin,
                   is_email_verified, failed_logins, locked_until, token_epoch, created_at
            FROM users WHERE email = $1
            ",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get user: {e}")))?;

        row.map(|r| Self::row_to_user(&r)).transpose()
    }

    /// Get a user by email, returning an error if not found
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the user does not exist, or an error if the
    /// database query fails.
    pub async fn get_user_required(&self, email: &str) -> AppResult<User> {
        self.get_user(email)
            .await?
            .ok_or_else(|| AppError::not_found(format!("User {email}")))
    }

    fn row_to_user(row: &SqliteRow) -> AppResult<User> {
        Ok(User {
            email: row.get("email"),
            full_name: row.get("full_name"),
            password_hash: row.get("password_hash"),
            is_platform_admin: row.get("is_platform_admin"),
            is_email_verified: row.get("is_email_verified"),
            failed_logins: row.get("failed_logins"),
            locked_until: row.get("locked_until"),
            token_epoch: row.get("token_epoch"),
            created_at: row.get("created_at"),
        })
    }

    /// Record a failed login, returning the updated consecutive failure count
    ///
    /// # Errors
    ///
    /// Returns an error if the database update fails
    pub async fn record_login_failure(&self, email: &str) -> AppResult<i64> {
        sqlx::query("UPDATE users SET failed_logins = failed_logins + 1 WHERE email = $1")
            .bind(email)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to record login failure: {e}")))?;

        let count: i64 = sqlx::query_scalar("SELECT failed_logins FROM users WHERE email = $1")
            .bind(email)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to read failure count: {e}")))?;
        Ok(count)
    }

    /// Clear the consecutive failure count after a successful login
    ///
    /// # Errors
    ///
    /// Returns an error if the database update fails
    pub async fn reset_login_failures(&self, email: &str) -> AppResult<()> {
        sqlx::query("UPDATE users SET failed_logins = 0, locked_until = NULL WHERE email = $1")
            .bind(email)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to reset login failures: {e}")))?;
        Ok(())
    }

    /// Lock the account until the given instant
    ///
    /// # Errors
    ///
    /// Returns an error if the database update fails
    pub async fn lock_user_until(&self, email: &str, until: DateTime<Utc>) -> AppResult<()> {
        sqlx::query("UPDATE users SET locked_until = $1 WHERE email = $2")
            .bind(until)
            .bind(email)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to lock user: {e}")))?;
        Ok(())
    }

    /// Update the password hash and bump the token epoch. Bumping the epoch
    /// invalidates every JWT issued before the change (session revocation).
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the user does not exist, or an error if the
    /// database update fails.
    pub async fn update_user_password(&self, email: &str, password_hash: &str) -> AppResult<()> {
        let result = sqlx::query(
            r"
            UPDATE users SET
                password_hash = $1,
                token_epoch = token_epoch + 1
            WHERE email = $2
            ",
        )
        .bind(password_hash)
        .bind(email)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to update password: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("User {email}")));
        }
        Ok(())
    }

    /// Grant or revoke platform administration
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the user does not exist, or an error if the
    /// database update fails.
    pub async fn set_platform_admin(&self, email: &str, is_admin: bool) -> AppResult<()> {
        let result = sqlx::query("UPDATE users SET is_platform_admin = $1 WHERE email = $2")
            .bind(is_admin)
            .bind(email)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to set platform admin: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("User {email}")));
        }
        Ok(())
    }

    /// Mark the email address verified
    ///
    /// # Errors
    ///
    /// Returns an error if the database update fails
    pub async fn mark_email_verified(&self, email: &str) -> AppResult<()> {
        sqlx::query("UPDATE users SET is_email_verified = 1 WHERE email = $1")
            .bind(email)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to mark email verified: {e}")))?;
        Ok(())
    }

    /// Total user count
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails
    pub async fn user_count(&self) -> AppResult<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to count users: {e}")))
    }

    /// Delete a user and all owned data (cascades through foreign keys)
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the user does not exist, or an error if the
    /// database operation fails.
    pub async fn delete_user(&self, email: &str) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM users WHERE email = $1")
            .bind(email)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to delete user: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("User {email}")));
        }
        Ok(())
    }
}
