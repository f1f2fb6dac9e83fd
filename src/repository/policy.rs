//! Policy rule tuple-store repository

use crate::domain::{PolicyRule, PolicyTuple, RuleType};
use crate::error::Result;
use async_trait::async_trait;
use sqlx::MySqlPool;

/// Tuple-store columns, in field-index order.
const VALUE_COLUMNS: [&str; 7] = ["v0", "v1", "v2", "v3", "v4", "v5", "v6"];

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PolicyRepository: Send + Sync {
    /// Insert a rule. Returns false when an identical rule already
    /// existed (idempotent).
    async fn add_rule(&self, rule: &PolicyRule) -> Result<bool>;

    /// Delete every rule matching the tuple of `rule` exactly. Returns
    /// the number of rows removed.
    async fn remove_rule(&self, rule: &PolicyRule) -> Result<u64>;

    /// Policy rules for the given domain keys matching (resource, action).
    async fn find_policy_rules(
        &self,
        domain_keys: &[String],
        resource: &str,
        action: &str,
    ) -> Result<Vec<PolicyRule>>;

    /// Raw filtered fetch: `values` match consecutive tuple fields
    /// starting at `field_index`; empty strings skip a field.
    async fn find_filtered(
        &self,
        rule_type: RuleType,
        field_index: usize,
        values: &[String],
    ) -> Result<Vec<PolicyRule>>;

    /// Remove rules by the same positional filter. Returns rows removed.
    async fn remove_filtered(
        &self,
        rule_type: RuleType,
        field_index: usize,
        values: &[String],
    ) -> Result<u64>;

    /// Role names granted to `subject` by grouping rules in one domain.
    async fn find_roles_for_subject(&self, subject: &str, domain_key: &str) -> Result<Vec<String>>;

    /// Remove one grouping rule. Returns whether a row was removed.
    async fn remove_grouping_rule(
        &self,
        subject: &str,
        role: &str,
        domain_key: &str,
    ) -> Result<bool>;

    /// Atomically replace all grouping rules for `subject` in one domain
    /// with the given role set. Readers never observe the interim empty
    /// state because delete and insert share one transaction.
    async fn replace_grouping_rules(
        &self,
        subject: &str,
        domain_key: &str,
        roles: &[String],
    ) -> Result<()>;
}

pub struct PolicyRepositoryImpl {
    pool: MySqlPool,
}

impl PolicyRepositoryImpl {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

fn positional_where(field_index: usize, values: &[String]) -> (String, Vec<&String>) {
    let mut sql = String::from("ptype = ?");
    let mut binds = Vec::new();
    for (offset, value) in values.iter().enumerate() {
        let column_index = field_index + offset;
        if value.is_empty() || column_index >= VALUE_COLUMNS.len() {
            continue;
        }
        sql.push_str(&format!(" AND {} = ?", VALUE_COLUMNS[column_index]));
        binds.push(value);
    }
    (sql, binds)
}

#[async_trait]
impl PolicyRepository for PolicyRepositoryImpl {
    async fn add_rule(&self, rule: &PolicyRule) -> Result<bool> {
        let t = rule.to_tuple();
        let result = sqlx::query(
            r#"
            INSERT IGNORE INTO policy_rules (ptype, v0, v1, v2, v3, v4, v5, v6)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&t.ptype)
        .bind(&t.v0)
        .bind(&t.v1)
        .bind(&t.v2)
        .bind(&t.v3)
        .bind(&t.v4)
        .bind(&t.v5)
        .bind(&t.v6)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn remove_rule(&self, rule: &PolicyRule) -> Result<u64> {
        let t = rule.to_tuple();
        let result = sqlx::query(
            r#"
            DELETE FROM policy_rules
            WHERE ptype = ? AND v0 = ? AND v1 = ? AND v2 = ? AND v3 = ? AND v4 = ? AND v5 = ? AND v6 = ?
            "#,
        )
        .bind(&t.ptype)
        .bind(&t.v0)
        .bind(&t.v1)
        .bind(&t.v2)
        .bind(&t.v3)
        .bind(&t.v4)
        .bind(&t.v5)
        .bind(&t.v6)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn find_policy_rules(
        &self,
        domain_keys: &[String],
        resource: &str,
        action: &str,
    ) -> Result<Vec<PolicyRule>> {
        if domain_keys.is_empty() {
            return Ok(vec![]);
        }

        let placeholders = vec!["?"; domain_keys.len()].join(", ");
        let sql = format!(
            "SELECT ptype, v0, v1, v2, v3, v4, v5, v6 FROM policy_rules \
             WHERE ptype = 'p' AND v1 IN ({}) AND v2 = ? AND v3 = ?",
            placeholders
        );

        let mut query = sqlx::query_as::<_, PolicyTuple>(&sql);
        for key in domain_keys {
            query = query.bind(key);
        }
        query = query.bind(resource).bind(action);

        let tuples = query.fetch_all(&self.pool).await?;
        tuples.iter().map(PolicyRule::from_tuple).collect()
    }

    async fn find_filtered(
        &self,
        rule_type: RuleType,
        field_index: usize,
        values: &[String],
    ) -> Result<Vec<PolicyRule>> {
        let (where_sql, binds) = positional_where(field_index, values);
        let sql = format!(
            "SELECT ptype, v0, v1, v2, v3, v4, v5, v6 FROM policy_rules WHERE {}",
            where_sql
        );

        let mut query = sqlx::query_as::<_, PolicyTuple>(&sql).bind(rule_type.as_str());
        for value in binds {
            query = query.bind(value);
        }

        let tuples = query.fetch_all(&self.pool).await?;
        tuples.iter().map(PolicyRule::from_tuple).collect()
    }

    async fn remove_filtered(
        &self,
        rule_type: RuleType,
        field_index: usize,
        values: &[String],
    ) -> Result<u64> {
        let (where_sql, binds) = positional_where(field_index, values);
        let sql = format!("DELETE FROM policy_rules WHERE {}", where_sql);

        let mut query = sqlx::query(&sql).bind(rule_type.as_str());
        for value in binds {
            query = query.bind(value);
        }

        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn find_roles_for_subject(&self, subject: &str, domain_key: &str) -> Result<Vec<String>> {
        let roles: Vec<(String,)> = sqlx::query_as(
            "SELECT v1 FROM policy_rules WHERE ptype = 'g' AND v0 = ? AND v2 = ?",
        )
        .bind(subject)
        .bind(domain_key)
        .fetch_all(&self.pool)
        .await?;

        Ok(roles.into_iter().map(|(name,)| name).collect())
    }

    async fn remove_grouping_rule(
        &self,
        subject: &str,
        role: &str,
        domain_key: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM policy_rules WHERE ptype = 'g' AND v0 = ? AND v1 = ? AND v2 = ?",
        )
        .bind(subject)
        .bind(role)
        .bind(domain_key)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn replace_grouping_rules(
        &self,
        subject: &str,
        domain_key: &str,
        roles: &[String],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM policy_rules WHERE ptype = 'g' AND v0 = ? AND v2 = ?")
            .bind(subject)
            .bind(domain_key)
            .execute(&mut *tx)
            .await?;

        for role in roles {
            sqlx::query(
                r#"
                INSERT INTO policy_rules (ptype, v0, v1, v2, v3, v4, v5, v6)
                VALUES ('g', ?, ?, ?, '', '', '', '')
                "#,
            )
            .bind(subject)
            .bind(role)
            .bind(domain_key)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}
