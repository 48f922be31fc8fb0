use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Result as SqlResult, Row};
use std::path::PathBuf;

use crate::models::{
    Approval, ApprovalStatus, Company, Document, DocumentKind, DocumentStatus, GmailIntegration,
    InvoiceData, ProcessingLog, Role, User,
};
use crate::utils::new_id;

const DOCUMENT_COLUMNS: &str = "id, kind, company_id, owner_id, file_name, file_url, file_hash, source_key,
    email_subject, email_from, email_date, status, data, ledger_ref, created_at, updated_at";

const USER_COLUMNS: &str = "id, email, name, company_id, role, created_at";

const APPROVAL_COLUMNS: &str =
    "id, approvable_id, approver_id, status, removable, created_at, updated_at";

/// Embedded record store. All tables live in one SQLite file.
pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn new(db_path: PathBuf) -> SqlResult<Self> {
        Self::init(Connection::open(db_path)?)
    }

    pub fn open_in_memory() -> SqlResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> SqlResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let mut db = Database { conn };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&mut self) -> SqlResult<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                name TEXT PRIMARY KEY,
                applied_at TEXT NOT NULL
            );",
        )?;

        let migrations = vec![
            (
                "001_create_companies_and_users.sql",
                include_str!(concat!(
                    env!("CARGO_MANIFEST_DIR"),
                    "/migrations/001_create_companies_and_users.sql"
                )),
            ),
            (
                "002_create_documents.sql",
                include_str!(concat!(
                    env!("CARGO_MANIFEST_DIR"),
                    "/migrations/002_create_documents.sql"
                )),
            ),
            (
                "003_create_approvals.sql",
                include_str!(concat!(
                    env!("CARGO_MANIFEST_DIR"),
                    "/migrations/003_create_approvals.sql"
                )),
            ),
            (
                "004_create_gmail_integrations.sql",
                include_str!(concat!(
                    env!("CARGO_MANIFEST_DIR"),
                    "/migrations/004_create_gmail_integrations.sql"
                )),
            ),
            (
                "005_create_processing_logs.sql",
                include_str!(concat!(
                    env!("CARGO_MANIFEST_DIR"),
                    "/migrations/005_create_processing_logs.sql"
                )),
            ),
        ];

        for (name, sql) in migrations {
            let applied: Option<String> = self
                .conn
                .query_row(
                    "SELECT name FROM schema_migrations WHERE name = ?1",
                    params![name],
                    |row| row.get(0),
                )
                .optional()?;

            if applied.is_none() {
                let tx = self.conn.transaction()?;
                tx.execute_batch(sql)?;
                tx.execute(
                    "INSERT INTO schema_migrations (name, applied_at) VALUES (?1, datetime('now'))",
                    params![name],
                )?;
                tx.commit()?;
            }
        }

        Ok(())
    }

    pub fn insert_company(&self, company: &Company) -> SqlResult<()> {
        self.conn.execute(
            "INSERT INTO companies (id, name, default_approver_ids, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                company.id,
                company.name,
                encode_json(&company.default_approver_ids)?,
                company.created_at
            ],
        )?;
        Ok(())
    }

    pub fn get_company(&self, id: &str) -> SqlResult<Option<Company>> {
        self.conn
            .query_row(
                "SELECT id, name, default_approver_ids, created_at FROM companies WHERE id = ?1",
                params![id],
                map_company,
            )
            .optional()
    }

    pub fn list_companies(&self) -> SqlResult<Vec<Company>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, default_approver_ids, created_at FROM companies ORDER BY name")?;
        let rows = stmt.query_map([], map_company)?;
        rows.collect()
    }

    pub fn set_default_approvers(&self, company_id: &str, approver_ids: &[String]) -> SqlResult<usize> {
        self.conn.execute(
            "UPDATE companies SET default_approver_ids = ?2 WHERE id = ?1",
            params![company_id, encode_json(&approver_ids)?],
        )
    }

    pub fn insert_user(&self, user: &User, password_hash: &str) -> SqlResult<()> {
        self.conn.execute(
            "INSERT INTO users (id, email, name, password_hash, company_id, role, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                user.id,
                user.email,
                user.name,
                password_hash,
                user.company_id,
                user.role.as_str(),
                user.created_at
            ],
        )?;
        Ok(())
    }

    pub fn get_user(&self, id: &str) -> SqlResult<Option<User>> {
        self.conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id],
                map_user,
            )
            .optional()
    }

    /// User plus stored password hash, looked up by email.
    pub fn get_user_credentials(&self, email: &str) -> SqlResult<Option<(User, String)>> {
        self.conn
            .query_row(
                &format!("SELECT {USER_COLUMNS}, password_hash FROM users WHERE email = ?1"),
                params![email],
                |row| Ok((map_user(row)?, row.get(6)?)),
            )
            .optional()
    }

    pub fn set_user_role(&self, id: &str, role: Role) -> SqlResult<usize> {
        self.conn
            .execute("UPDATE users SET role = ?2 WHERE id = ?1", params![id, role.as_str()])
    }

    pub fn list_users(&self, company_id: &str) -> SqlResult<Vec<User>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE company_id = ?1 ORDER BY email"
        ))?;
        let rows = stmt.query_map(params![company_id], map_user)?;
        rows.collect()
    }

    pub fn insert_session(&self, token_hash: &str, user_id: &str, expires_at: &str, now: &str) -> SqlResult<()> {
        self.conn.execute(
            "INSERT INTO sessions (token_hash, user_id, expires_at, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![token_hash, user_id, expires_at, now],
        )?;
        Ok(())
    }

    /// Owner of a session that has not expired at `now` (RFC 3339, UTC).
    pub fn get_session_user(&self, token_hash: &str, now: &str) -> SqlResult<Option<User>> {
        self.conn
            .query_row(
                "SELECT u.id, u.email, u.name, u.company_id, u.role, u.created_at
                 FROM sessions s JOIN users u ON u.id = s.user_id
                 WHERE s.token_hash = ?1 AND s.expires_at > ?2",
                params![token_hash, now],
                map_user,
            )
            .optional()
    }

    pub fn delete_session(&self, token_hash: &str) -> SqlResult<usize> {
        self.conn
            .execute("DELETE FROM sessions WHERE token_hash = ?1", params![token_hash])
    }

    pub fn insert_document(&self, document: &Document) -> SqlResult<()> {
        let data = document.data.as_ref().map(encode_json).transpose()?;
        self.conn.execute(
            &format!(
                "INSERT INTO documents ({DOCUMENT_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"
            ),
            params![
                document.id,
                document.kind.as_str(),
                document.company_id,
                document.owner_id,
                document.file_name,
                document.file_url,
                document.file_hash,
                document.source_key,
                document.email_subject,
                document.email_from,
                document.email_date,
                document.status.as_str(),
                data,
                document.ledger_ref,
                document.created_at,
                document.updated_at
            ],
        )?;
        Ok(())
    }

    pub fn get_document(&self, id: &str) -> SqlResult<Option<Document>> {
        self.conn
            .query_row(
                &format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?1"),
                params![id],
                map_document,
            )
            .optional()
    }

    pub fn get_document_by_source_key(&self, source_key: &str) -> SqlResult<Option<Document>> {
        self.conn
            .query_row(
                &format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE source_key = ?1"),
                params![source_key],
                map_document,
            )
            .optional()
    }

    pub fn get_document_by_url(&self, file_url: &str) -> SqlResult<Option<Document>> {
        self.conn
            .query_row(
                &format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE file_url = ?1"),
                params![file_url],
                map_document,
            )
            .optional()
    }

    pub fn list_documents(
        &self,
        company_id: &str,
        kind: Option<DocumentKind>,
        status: Option<DocumentStatus>,
    ) -> SqlResult<Vec<Document>> {
        let mut sql = format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE company_id = ?1");
        let mut values = vec![company_id.to_string()];
        if let Some(kind) = kind {
            values.push(kind.as_str().to_string());
            sql.push_str(&format!(" AND kind = ?{}", values.len()));
        }
        if let Some(status) = status {
            values.push(status.as_str().to_string());
            sql.push_str(&format!(" AND status = ?{}", values.len()));
        }
        sql.push_str(" ORDER BY created_at DESC");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), map_document)?;
        rows.collect()
    }

    /// Writes extracted data and moves the record to FOR_REVIEW in one statement.
    /// Only records still awaiting or under review are touched.
    pub fn apply_extraction(&self, file_url: &str, data: &InvoiceData, now: &str) -> SqlResult<usize> {
        self.conn.execute(
            "UPDATE documents SET data = ?2, status = 'FOR_REVIEW', updated_at = ?3
             WHERE file_url = ?1 AND status IN ('UNPROCESSED', 'FOR_REVIEW')",
            params![file_url, encode_json(data)?, now],
        )
    }

    pub fn update_document_data(&self, id: &str, data: &InvoiceData, now: &str) -> SqlResult<usize> {
        self.conn.execute(
            "UPDATE documents SET data = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, encode_json(data)?, now],
        )
    }

    pub fn update_document_status(&self, id: &str, status: DocumentStatus, now: &str) -> SqlResult<usize> {
        self.conn.execute(
            "UPDATE documents SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, status.as_str(), now],
        )
    }

    pub fn mark_processed(&self, id: &str, ledger_ref: &str, now: &str) -> SqlResult<usize> {
        self.conn.execute(
            "UPDATE documents SET status = 'PROCESSED', ledger_ref = ?2, updated_at = ?3
             WHERE id = ?1 AND status = 'APPROVED'",
            params![id, ledger_ref, now],
        )
    }

    /// Deletes the given documents of one company together with their approvals.
    pub fn delete_documents(&self, company_id: &str, ids: &[String]) -> SqlResult<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let mut deleted = 0;
        for id in ids {
            tx.execute(
                "DELETE FROM approvals WHERE approvable_id IN
                    (SELECT id FROM documents WHERE id = ?1 AND company_id = ?2)",
                params![id, company_id],
            )?;
            deleted += tx.execute(
                "DELETE FROM documents WHERE id = ?1 AND company_id = ?2",
                params![id, company_id],
            )?;
        }
        tx.commit()?;
        Ok(deleted)
    }

    pub fn count_by_status(&self, company_id: &str) -> SqlResult<Vec<(DocumentStatus, usize)>> {
        let mut stmt = self.conn.prepare(
            "SELECT status, COUNT(*) FROM documents WHERE company_id = ?1 GROUP BY status",
        )?;
        let rows = stmt.query_map(params![company_id], |row| {
            let status = parse_column(0, row.get(0)?, DocumentStatus::parse)?;
            let count: i64 = row.get(1)?;
            Ok((status, count as usize))
        })?;
        rows.collect()
    }

    pub fn insert_approval(&self, approval: &Approval) -> SqlResult<()> {
        self.conn.execute(
            &format!("INSERT INTO approvals ({APPROVAL_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"),
            params![
                approval.id,
                approval.approvable_id,
                approval.approver_id,
                approval.status.as_str(),
                approval.removable,
                approval.created_at,
                approval.updated_at
            ],
        )?;
        Ok(())
    }

    pub fn get_approval(&self, id: &str) -> SqlResult<Option<Approval>> {
        self.conn
            .query_row(
                &format!("SELECT {APPROVAL_COLUMNS} FROM approvals WHERE id = ?1"),
                params![id],
                map_approval,
            )
            .optional()
    }

    pub fn find_approval(&self, approvable_id: &str, approver_id: &str) -> SqlResult<Option<Approval>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {APPROVAL_COLUMNS} FROM approvals WHERE approvable_id = ?1 AND approver_id = ?2"
                ),
                params![approvable_id, approver_id],
                map_approval,
            )
            .optional()
    }

    pub fn list_approvals(&self, approvable_id: &str) -> SqlResult<Vec<Approval>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {APPROVAL_COLUMNS} FROM approvals WHERE approvable_id = ?1 ORDER BY created_at"
        ))?;
        let rows = stmt.query_map(params![approvable_id], map_approval)?;
        rows.collect()
    }

    pub fn delete_approval(&self, id: &str) -> SqlResult<usize> {
        self.conn.execute("DELETE FROM approvals WHERE id = ?1", params![id])
    }

    pub fn update_approval_status(&self, id: &str, status: ApprovalStatus, now: &str) -> SqlResult<usize> {
        self.conn.execute(
            "UPDATE approvals SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, status.as_str(), now],
        )
    }

    pub fn insert_gmail_integration(&self, integration: &GmailIntegration) -> SqlResult<()> {
        self.conn.execute(
            "INSERT INTO gmail_integrations (
                company_id, processed_label_id, processed_label_name,
                ignored_label_id, ignored_label_name, created_by, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                integration.company_id,
                integration.processed_label_id,
                integration.processed_label_name,
                integration.ignored_label_id,
                integration.ignored_label_name,
                integration.created_by,
                integration.created_at
            ],
        )?;
        Ok(())
    }

    pub fn get_gmail_integration(&self, company_id: &str) -> SqlResult<Option<GmailIntegration>> {
        self.conn
            .query_row(
                "SELECT company_id, processed_label_id, processed_label_name,
                        ignored_label_id, ignored_label_name, created_by, created_at
                 FROM gmail_integrations WHERE company_id = ?1",
                params![company_id],
                map_gmail_integration,
            )
            .optional()
    }

    pub fn list_gmail_integrations(&self) -> SqlResult<Vec<GmailIntegration>> {
        let mut stmt = self.conn.prepare(
            "SELECT company_id, processed_label_id, processed_label_name,
                    ignored_label_id, ignored_label_name, created_by, created_at
             FROM gmail_integrations",
        )?;
        let rows = stmt.query_map([], map_gmail_integration)?;
        rows.collect()
    }

    pub fn log_processing(
        &self,
        document_id: Option<&str>,
        file_hash: Option<&str>,
        process_type: &str,
        status: &str,
        message: Option<&str>,
    ) -> SqlResult<()> {
        self.conn.execute(
            "INSERT INTO processing_logs (id, document_id, file_hash, process_type, status, message, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))",
            params![new_id(), document_id, file_hash, process_type, status, message],
        )?;
        Ok(())
    }

    pub fn get_processing_logs(&self, document_id: &str) -> SqlResult<Vec<ProcessingLog>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, document_id, file_hash, process_type, status, message, created_at
             FROM processing_logs WHERE document_id = ?1 ORDER BY created_at, rowid",
        )?;
        let rows = stmt.query_map(params![document_id], |row| {
            Ok(ProcessingLog {
                id: row.get(0)?,
                document_id: row.get(1)?,
                file_hash: row.get(2)?,
                process_type: row.get(3)?,
                status: row.get(4)?,
                message: row.get(5)?,
                created_at: row.get(6)?,
            })
        })?;
        rows.collect()
    }
}

fn parse_column<T>(idx: usize, raw: String, parse: fn(&str) -> Option<T>) -> SqlResult<T> {
    parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, format!("unexpected value {raw:?}").into())
    })
}

fn encode_json<T: serde::Serialize + ?Sized>(value: &T) -> SqlResult<String> {
    serde_json::to_string(value).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

fn decode_json<T: serde::de::DeserializeOwned>(idx: usize, raw: &str) -> SqlResult<T> {
    serde_json::from_str(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn map_company(row: &Row<'_>) -> SqlResult<Company> {
    let approvers: String = row.get(2)?;
    Ok(Company {
        id: row.get(0)?,
        name: row.get(1)?,
        default_approver_ids: decode_json(2, &approvers)?,
        created_at: row.get(3)?,
    })
}

fn map_user(row: &Row<'_>) -> SqlResult<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        name: row.get(2)?,
        company_id: row.get(3)?,
        role: parse_column(4, row.get(4)?, Role::parse)?,
        created_at: row.get(5)?,
    })
}

fn map_document(row: &Row<'_>) -> SqlResult<Document> {
    let data: Option<String> = row.get(12)?;
    Ok(Document {
        id: row.get(0)?,
        kind: parse_column(1, row.get(1)?, DocumentKind::parse)?,
        company_id: row.get(2)?,
        owner_id: row.get(3)?,
        file_name: row.get(4)?,
        file_url: row.get(5)?,
        file_hash: row.get(6)?,
        source_key: row.get(7)?,
        email_subject: row.get(8)?,
        email_from: row.get(9)?,
        email_date: row.get(10)?,
        status: parse_column(11, row.get(11)?, DocumentStatus::parse)?,
        data: data.as_deref().map(|raw| decode_json(12, raw)).transpose()?,
        ledger_ref: row.get(13)?,
        created_at: row.get(14)?,
        updated_at: row.get(15)?,
    })
}

fn map_approval(row: &Row<'_>) -> SqlResult<Approval> {
    Ok(Approval {
        id: row.get(0)?,
        approvable_id: row.get(1)?,
        approver_id: row.get(2)?,
        status: parse_column(3, row.get(3)?, ApprovalStatus::parse)?,
        removable: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn map_gmail_integration(row: &Row<'_>) -> SqlResult<GmailIntegration> {
    Ok(GmailIntegration {
        company_id: row.get(0)?,
        processed_label_id: row.get(1)?,
        processed_label_name: row.get(2)?,
        ignored_label_id: row.get(3)?,
        ignored_label_name: row.get(4)?,
        created_by: row.get(5)?,
        created_at: row.get(6)?,
    })
}
