// ABOUTME: Team, membership, and invitation database operations
// ABOUTME: Invitations are single-use tokens consumed atomically
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 MCP Gateway Contributors

use super::{parse_uuid, Database};
use crate::errors::{AppError, AppResult};
use crate::models::{Team, TeamInvitation, TeamMember, TeamRole, Visibility};
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::collections::HashMap;
use uuid::Uuid;

impl Database {
    /// Create a team and enroll its owner in one transaction
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub async fn create_team(&self, team: &Team) -> AppResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::database(format!("Failed to begin transaction: {e}")))?;

        sqlx::query(
            r"
            INSERT INTO teams (id, name, owner_email, visibility, is_personal, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ",
        )
        .bind(team.id.to_string())
        .bind(&team.name)
        .bind(&team.owner_email)
        .bind(team.visibility.as_str())
        .bind(team.is_personal)
        .bind(team.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::database(format!("Failed to create team: {e}")))?;

        sqlx::query(
            r"
            INSERT INTO team_members (team_id, user_email, role, created_at)
            VALUES ($1, $2, $3, $4)
            ",
        )
        .bind(team.id.to_string())
        .bind(&team.owner_email)
        .bind(TeamRole::Owner.as_str())
        .bind(team.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::database(format!("Failed to enroll team owner: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| AppError::database(format!("Failed to commit team creation: {e}")))?;
        Ok(())
    }

    /// Get a team by id
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails
    pub async fn get_team(&self, team_id: Uuid) -> AppResult<Option<Team>> {
        let row = sqlx::query(
            "SELECT id, name, owner_email, visibility, is_personal, created_at FROM teams WHERE id = $1",
        )
        .bind(team_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get team: {e}")))?;

        row.map(|r| Self::row_to_team(&r)).transpose()
    }

    fn row_to_team(row: &SqliteRow) -> AppResult<Team> {
        let id: String = row.get("id");
        let visibility: String = row.get("visibility");
        Ok(Team {
            id: parse_uuid(&id, "teams.id")?,
            name: row.get("name"),
            owner_email: row.get("owner_email"),
            visibility: Visibility::from_str_lossy(&visibility),
            is_personal: row.get("is_personal"),
            created_at: row.get("created_at"),
        })
    }

    /// The user's personal team, when present
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails
    pub async fn get_personal_team(&self, email: &str) -> AppResult<Option<Team>> {
        let row = sqlx::query(
            r"
            SELECT id, name, owner_email, visibility, is_personal, created_at
            FROM teams WHERE owner_email = $1 AND is_personal = 1
            ",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get personal team: {e}")))?;

        row.map(|r| Self::row_to_team(&r)).transpose()
    }

    /// All memberships for a user as `team_id -> role`
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails
    pub async fn membership_map(&self, email: &str) -> AppResult<HashMap<Uuid, TeamRole>> {
        let rows = sqlx::query("SELECT team_id, role FROM team_members WHERE user_email = $1")
            .bind(email)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to list memberships: {e}")))?;

        let mut map = HashMap::with_capacity(rows.len());
        for row in rows {
            let team_id: String = row.get("team_id");
            let role: String = row.get("role");
            map.insert(
                parse_uuid(&team_id, "team_members.team_id")?,
                TeamRole::from_str_lossy(&role),
            );
        }
        Ok(map)
    }

    /// Members of a team
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails
    pub async fn list_team_members(&self, team_id: Uuid) -> AppResult<Vec<TeamMember>> {
        let rows = sqlx::query(
            r"
            SELECT team_id, user_email, role, created_at
            FROM team_members WHERE team_id = $1 ORDER BY created_at ASC
            ",
        )
        .bind(team_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to list team members: {e}")))?;

        let mut members = Vec::with_capacity(rows.len());
        for row in rows {
            let tid: String = row.get("team_id");
            let role: String = row.get("role");
            members.push(TeamMember {
                team_id: parse_uuid(&tid, "team_members.team_id")?,
                user_email: row.get("user_email"),
                role: TeamRole::from_str_lossy(&role),
                created_at: row.get("created_at"),
            });
        }
        Ok(members)
    }

    /// Add a member to a team
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if the user is already a member, or an error if the
    /// database operation fails.
    pub async fn add_team_member(
        &self,
        team_id: Uuid,
        user_email: &str,
        role: TeamRole,
    ) -> AppResult<()> {
        let result = sqlx::query(
            r"
            INSERT INTO team_members (team_id, user_email, role, created_at)
            VALUES ($1, $2, $3, $4)
            ",
        )
        .bind(team_id.to_string())
        .bind(user_email)
        .bind(role.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(AppError::conflict(
                format!("{user_email} is already a member of team {team_id}"),
            )),
            Err(e) => Err(AppError::database(format!("Failed to add member: {e}"))),
        }
    }

    /// Remove a member from a team
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no such membership exists, or an error if the
    /// database operation fails.
    pub async fn remove_team_member(&self, team_id: Uuid, user_email: &str) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM team_members WHERE team_id = $1 AND user_email = $2")
            .bind(team_id.to_string())
            .bind(user_email)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to remove member: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!(
                "Membership of {user_email} in team {team_id}"
            )));
        }
        Ok(())
    }

    /// Store a team invitation
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    pub async fn create_invitation(&self, invitation: &TeamInvitation) -> AppResult<()> {
        sqlx::query(
            r"
            INSERT INTO team_invitations (id, team_id, invitee_email, token, expires_at, used_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ",
        )
        .bind(invitation.id.to_string())
        .bind(invitation.team_id.to_string())
        .bind(&invitation.invitee_email)
        .bind(&invitation.token)
        .bind(invitation.expires_at)
        .bind(invitation.used_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to create invitation: {e}")))?;
        Ok(())
    }

    /// Atomically consume an invitation token: marks it used only when it is
    /// unused and unexpired, and returns the row. A second redemption sees
    /// zero affected rows and fails.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the token is unknown, already used, or expired.
    pub async fn consume_invitation(&self, token: &str) -> AppResult<TeamInvitation> {
        let now = Utc::now();
        let result = sqlx::query(
            r"
            UPDATE team_invitations
            SET used_at = $1
            WHERE token = $2 AND used_at IS NULL AND expires_at > $1
            ",
        )
        .bind(now)
        .bind(token)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to consume invitation: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found(
                "Invitation token is unknown, expired, or already used",
            ));
        }

        let row = sqlx::query(
            r"
            SELECT id, team_id, invitee_email, token, expires_at, used_at
            FROM team_invitations WHERE token = $1
            ",
        )
        .bind(token)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to load invitation: {e}")))?;

        let id: String = row.get("id");
        let team_id: String = row.get("team_id");
        Ok(TeamInvitation {
            id: parse_uuid(&id, "team_invitations.id")?,
            team_id: parse_uuid(&team_id, "team_invitations.team_id")?,
            invitee_email: row.get("invitee_email"),
            token: row.get("token"),
            expires_at: row.get("expires_at"),
            used_at: row.get("used_at"),
        })
    }
}
