use sqlx::Row;

use spendgate_core::approvals::{OrganizationSnapshot, PermissionScope};
use spendgate_core::domain::organization::{
    Membership, OrgUnit, OrgUnitId, PermissionGrant, TenantId, User, UserId,
};

use super::{decode_error, parse_optional_timestamp, OrganizationRepository, RepositoryError};
use crate::DbPool;

pub struct SqlOrganizationRepository {
    pool: DbPool,
}

impl SqlOrganizationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const TENANT_USERS: &str = "SELECT id, tenant_id, display_name, active FROM app_user
     WHERE tenant_id = ?1
        OR id IN (SELECT user_id FROM permission_grant WHERE tenant_id = ?1)
     ORDER BY id ASC";

const GLOBAL_USERS: &str = "SELECT id, tenant_id, display_name, active FROM app_user
     WHERE tenant_id = ?1
        OR id IN (SELECT user_id FROM permission_grant)
     ORDER BY id ASC";

const TENANT_GRANTS: &str =
    "SELECT user_id, tenant_id, permission FROM permission_grant WHERE tenant_id = ?1
     ORDER BY user_id ASC, permission ASC";

const GLOBAL_GRANTS: &str = "SELECT user_id, tenant_id, permission FROM permission_grant
     ORDER BY tenant_id ASC, user_id ASC, permission ASC";

#[async_trait::async_trait]
impl OrganizationRepository for SqlOrganizationRepository {
    async fn load_snapshot(
        &self,
        tenant_id: &TenantId,
        scope: PermissionScope,
    ) -> Result<OrganizationSnapshot, RepositoryError> {
        let (users_sql, grants_sql) = match scope {
            PermissionScope::Tenant => (TENANT_USERS, TENANT_GRANTS),
            PermissionScope::Global => (GLOBAL_USERS, GLOBAL_GRANTS),
        };
        let mut snapshot = OrganizationSnapshot::new(scope);

        for row in sqlx::query(users_sql).bind(&tenant_id.0).fetch_all(&self.pool).await? {
            snapshot.add_user(User {
                id: UserId(row.try_get("id").map_err(decode_error)?),
                tenant_id: TenantId(row.try_get("tenant_id").map_err(decode_error)?),
                display_name: row.try_get("display_name").map_err(decode_error)?,
                active: row.try_get::<i64, _>("active").map_err(decode_error)? != 0,
            });
        }

        let unit_rows = sqlx::query(
            "SELECT id, tenant_id, name, parent_id FROM org_unit WHERE tenant_id = ? ORDER BY id",
        )
        .bind(&tenant_id.0)
        .fetch_all(&self.pool)
        .await?;
        for row in unit_rows {
            let parent_id: Option<String> = row.try_get("parent_id").map_err(decode_error)?;
            snapshot.add_unit(OrgUnit {
                id: OrgUnitId(row.try_get("id").map_err(decode_error)?),
                tenant_id: TenantId(row.try_get("tenant_id").map_err(decode_error)?),
                name: row.try_get("name").map_err(decode_error)?,
                parent_id: parent_id.map(OrgUnitId),
            });
        }

        let membership_rows = sqlx::query(
            "SELECT m.user_id, m.unit_id, m.role, m.is_primary, m.ends_at
             FROM org_membership m
             JOIN org_unit u ON u.id = m.unit_id
             WHERE u.tenant_id = ?
             ORDER BY m.id ASC",
        )
        .bind(&tenant_id.0)
        .fetch_all(&self.pool)
        .await?;
        for row in membership_rows {
            let ends_at: Option<String> = row.try_get("ends_at").map_err(decode_error)?;
            snapshot.add_membership(Membership {
                user_id: UserId(row.try_get("user_id").map_err(decode_error)?),
                unit_id: OrgUnitId(row.try_get("unit_id").map_err(decode_error)?),
                role: row.try_get("role").map_err(decode_error)?,
                is_primary: row.try_get::<i64, _>("is_primary").map_err(decode_error)? != 0,
                ends_at: parse_optional_timestamp("ends_at", ends_at)?,
            });
        }

        for row in sqlx::query(grants_sql).bind(&tenant_id.0).fetch_all(&self.pool).await? {
            snapshot.add_grant(PermissionGrant {
                user_id: UserId(row.try_get("user_id").map_err(decode_error)?),
                tenant_id: TenantId(row.try_get("tenant_id").map_err(decode_error)?),
                permission: row.try_get("permission").map_err(decode_error)?,
            });
        }

        tracing::debug!(
            event_name = "db.organization_snapshot_loaded",
            tenant_id = %tenant_id.0,
            permission_scope = scope.as_str(),
            users = snapshot.user_count(),
            "organization snapshot loaded"
        );

        Ok(snapshot)
    }

    async fn save_user(&self, user: User) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO app_user (id, tenant_id, display_name, active)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 tenant_id = excluded.tenant_id,
                 display_name = excluded.display_name,
                 active = excluded.active",
        )
        .bind(&user.id.0)
        .bind(&user.tenant_id.0)
        .bind(&user.display_name)
        .bind(user.active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_unit(&self, unit: OrgUnit) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO org_unit (id, tenant_id, name, parent_id)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 parent_id = excluded.parent_id",
        )
        .bind(&unit.id.0)
        .bind(&unit.tenant_id.0)
        .bind(&unit.name)
        .bind(unit.parent_id.as_ref().map(|parent| parent.0.as_str()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn add_membership(&self, membership: Membership) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO org_membership (user_id, unit_id, role, is_primary, ends_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(user_id, unit_id, role) DO UPDATE SET
                 is_primary = excluded.is_primary,
                 ends_at = excluded.ends_at",
        )
        .bind(&membership.user_id.0)
        .bind(&membership.unit_id.0)
        .bind(&membership.role)
        .bind(membership.is_primary)
        .bind(membership.ends_at.map(|ends_at| ends_at.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn add_grant(&self, grant: PermissionGrant) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO permission_grant (user_id, tenant_id, permission)
             VALUES (?, ?, ?)
             ON CONFLICT(user_id, tenant_id, permission) DO NOTHING",
        )
        .bind(&grant.user_id.0)
        .bind(&grant.tenant_id.0)
        .bind(&grant.permission)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use spendgate_core::approvals::{OrganizationDirectory, PermissionScope};
    use spendgate_core::domain::organization::{
        Membership, OrgUnit, OrgUnitId, PermissionGrant, TenantId, User, UserId,
    };

    use super::SqlOrganizationRepository;
    use crate::repositories::OrganizationRepository;
    use crate::{connect_with_settings, migrations};

    fn user(id: &str, tenant: &str) -> User {
        User {
            id: UserId(id.to_string()),
            tenant_id: TenantId(tenant.to_string()),
            display_name: id.to_string(),
            active: true,
        }
    }

    async fn seeded() -> SqlOrganizationRepository {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let repo = SqlOrganizationRepository::new(pool);

        repo.save_user(user("u-alice", "acme")).await.expect("alice");
        repo.save_user(user("u-bob", "acme")).await.expect("bob");
        repo.save_user(user("u-auditor", "globex")).await.expect("auditor");
        repo.save_unit(OrgUnit {
            id: OrgUnitId("ou-root".to_string()),
            tenant_id: TenantId("acme".to_string()),
            name: "Acme".to_string(),
            parent_id: None,
        })
        .await
        .expect("root unit");
        repo.save_unit(OrgUnit {
            id: OrgUnitId("ou-eng".to_string()),
            tenant_id: TenantId("acme".to_string()),
            name: "Engineering".to_string(),
            parent_id: Some(OrgUnitId("ou-root".to_string())),
        })
        .await
        .expect("eng unit");
        repo.add_membership(Membership {
            user_id: UserId("u-alice".to_string()),
            unit_id: OrgUnitId("ou-eng".to_string()),
            role: "MEMBER".to_string(),
            is_primary: true,
            ends_at: Some(Utc::now() + Duration::days(30)),
        })
        .await
        .expect("alice membership");
        repo.add_membership(Membership {
            user_id: UserId("u-bob".to_string()),
            unit_id: OrgUnitId("ou-eng".to_string()),
            role: "MANAGER".to_string(),
            is_primary: true,
            ends_at: None,
        })
        .await
        .expect("bob membership");
        repo.add_grant(PermissionGrant {
            user_id: UserId("u-auditor".to_string()),
            tenant_id: TenantId("globex".to_string()),
            permission: "expenses.approve_all".to_string(),
        })
        .await
        .expect("grant");
        repo
    }

    #[tokio::test]
    async fn snapshot_contains_tenant_units_and_memberships() {
        let repo = seeded().await;
        let snapshot = repo
            .load_snapshot(&TenantId("acme".to_string()), PermissionScope::Tenant)
            .await
            .expect("snapshot");

        assert_eq!(snapshot.user_count(), 2);
        assert_eq!(snapshot.members_of(&OrgUnitId("ou-eng".to_string())).len(), 2);
        let eng = snapshot.unit(&OrgUnitId("ou-eng".to_string())).expect("eng unit");
        assert_eq!(eng.parent_id, Some(OrgUnitId("ou-root".to_string())));
        assert!(snapshot
            .permission_holders(&TenantId("acme".to_string()), "expenses.approve_all")
            .is_empty());
    }

    #[tokio::test]
    async fn global_scope_pulls_in_foreign_permission_holders() {
        let repo = seeded().await;
        let snapshot = repo
            .load_snapshot(&TenantId("acme".to_string()), PermissionScope::Global)
            .await
            .expect("snapshot");

        assert_eq!(snapshot.user_count(), 3);
        assert_eq!(
            snapshot.permission_holders(&TenantId("acme".to_string()), "expenses.approve_all"),
            vec![UserId("u-auditor".to_string())]
        );
    }

    #[tokio::test]
    async fn duplicate_grants_are_ignored() {
        let repo = seeded().await;
        let grant = PermissionGrant {
            user_id: UserId("u-auditor".to_string()),
            tenant_id: TenantId("globex".to_string()),
            permission: "expenses.approve_all".to_string(),
        };
        repo.add_grant(grant).await.expect("second grant is a no-op");
    }
}
