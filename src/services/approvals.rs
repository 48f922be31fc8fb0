use std::collections::HashSet;

use tracing::info;

use crate::db::Database;
use crate::errors::{AppError, Result};
use crate::models::{Approval, ApprovalState, ApprovalStatus, ApprovalSummary, Company, User};
use crate::services::review::visible_document;
use crate::utils::{new_id, now_rfc3339};

/// Adds `approver_id` to the document's approvers, or removes them if already
/// present. Non-removable approvals are left untouched.
pub fn toggle_approver(db: &Database, user: &User, document_id: &str, approver_id: &str) -> Result<ApprovalState> {
    let document = visible_document(db, user, document_id)?;

    if let Some(existing) = db.find_approval(&document.id, approver_id)? {
        if !existing.removable {
            return Ok(ApprovalState::Unchanged(existing));
        }
        db.delete_approval(&existing.id)?;
        info!(document_id = %document.id, approver_id, "approver removed");
        return Ok(ApprovalState::Removed);
    }

    let approver = db
        .get_user(approver_id)?
        .filter(|approver| approver.company_id == document.company_id)
        .ok_or_else(|| AppError::BadRequest(format!("{} is not a user of this company", approver_id)))?;

    let approval = new_approval(&document.id, &approver.id, true);
    db.insert_approval(&approval)?;
    info!(document_id = %document.id, approver_id, "approver added");
    Ok(ApprovalState::Added(approval))
}

/// An approver acting on their own approval. Any status value may follow any other.
pub fn set_approval_status(db: &Database, user: &User, approval_id: &str, status: ApprovalStatus) -> Result<Approval> {
    let approval = db
        .get_approval(approval_id)?
        .ok_or_else(|| AppError::NotFound(format!("approval {} not found", approval_id)))?;
    if approval.approver_id != user.id {
        return Err(AppError::Forbidden("only the approver may change this approval".to_string()));
    }

    db.update_approval_status(approval_id, status, &now_rfc3339())?;
    info!(approval_id, document_id = %approval.approvable_id, status = status.as_str(), "approval updated");
    db.get_approval(approval_id)?
        .ok_or_else(|| AppError::NotFound(format!("approval {} not found", approval_id)))
}

pub fn approval_summary(approvals: &[Approval]) -> ApprovalSummary {
    let count = |status: ApprovalStatus| approvals.iter().filter(|a| a.status == status).count();
    ApprovalSummary {
        total: approvals.len(),
        approved: count(ApprovalStatus::Approved),
        rejected: count(ApprovalStatus::Rejected),
        pending: count(ApprovalStatus::Pending),
        all_required_approved: approvals
            .iter()
            .filter(|a| !a.removable)
            .all(|a| a.status == ApprovalStatus::Approved),
    }
}

/// Attaches the company's default approvers to a new document as required approvals.
pub fn assign_default_approvers(db: &Database, company: &Company, document_id: &str) -> Result<Vec<Approval>> {
    let mut assigned = Vec::new();
    for approver_id in &company.default_approver_ids {
        if db.find_approval(document_id, approver_id)?.is_some() {
            continue;
        }
        let approval = new_approval(document_id, approver_id, false);
        db.insert_approval(&approval)?;
        assigned.push(approval);
    }
    Ok(assigned)
}

pub fn set_default_approvers(db: &Database, user: &User, company_id: &str, approver_ids: Vec<String>) -> Result<Company> {
    if !user.administers(company_id) {
        return Err(AppError::Forbidden("only the company admin may change default approvers".to_string()));
    }
    let company = db
        .get_company(company_id)?
        .ok_or_else(|| AppError::NotFound(format!("company {} not found", company_id)))?;

    let members = db.list_users(&company.id)?;
    let mut seen = HashSet::new();
    let mut approver_ids = approver_ids;
    approver_ids.retain(|id| seen.insert(id.clone()));
    if let Some(unknown) = approver_ids
        .iter()
        .find(|id| !members.iter().any(|member| &member.id == *id))
    {
        return Err(AppError::BadRequest(format!("{} is not a user of company {}", unknown, company.id)));
    }

    db.set_default_approvers(&company.id, &approver_ids)?;
    info!(company_id = %company.id, approvers = approver_ids.len(), "default approvers replaced");
    Ok(Company {
        default_approver_ids: approver_ids,
        ..company
    })
}

fn new_approval(document_id: &str, approver_id: &str, removable: bool) -> Approval {
    let now = now_rfc3339();
    Approval {
        id: new_id(),
        approvable_id: document_id.to_string(),
        approver_id: approver_id.to_string(),
        status: ApprovalStatus::Pending,
        removable,
        created_at: now.clone(),
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocumentStatus, Role};
    use crate::testing::{insert_document, seed_company, seed_user};

    #[test]
    fn toggle_adds_then_removes() {
        let db = Database::open_in_memory().unwrap();
        let (_, clerk) = seed_company(&db, "c1", "u1");
        let approver = seed_user(&db, "c1", "u2", Role::Member);
        insert_document(&db, "d1", &clerk, DocumentStatus::ForReview, None);

        let added = toggle_approver(&db, &clerk, "d1", &approver.id).unwrap();
        assert!(matches!(added, ApprovalState::Added(ref a) if a.status == ApprovalStatus::Pending && a.removable));
        assert_eq!(db.list_approvals("d1").unwrap().len(), 1);

        let removed = toggle_approver(&db, &clerk, "d1", &approver.id).unwrap();
        assert!(matches!(removed, ApprovalState::Removed));
        assert!(db.list_approvals("d1").unwrap().is_empty());
    }

    #[test]
    fn required_approvals_survive_toggle() {
        let db = Database::open_in_memory().unwrap();
        let (mut company, clerk) = seed_company(&db, "c1", "u1");
        let approver = seed_user(&db, "c1", "u2", Role::Member);
        insert_document(&db, "d1", &clerk, DocumentStatus::ForReview, None);
        company.default_approver_ids = vec![approver.id.clone()];
        assign_default_approvers(&db, &company, "d1").unwrap();

        let before = db.list_approvals("d1").unwrap().len();
        let state = toggle_approver(&db, &clerk, "d1", &approver.id).unwrap();
        assert!(matches!(state, ApprovalState::Unchanged(ref a) if !a.removable));
        assert_eq!(db.list_approvals("d1").unwrap().len(), before);
    }

    #[test]
    fn approver_must_belong_to_the_company() {
        let db = Database::open_in_memory().unwrap();
        let (_, clerk) = seed_company(&db, "c1", "u1");
        let (_, outsider) = seed_company(&db, "c2", "u9");
        insert_document(&db, "d1", &clerk, DocumentStatus::ForReview, None);

        assert!(matches!(
            toggle_approver(&db, &clerk, "d1", &outsider.id),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn only_the_approver_sets_status() {
        let db = Database::open_in_memory().unwrap();
        let (_, clerk) = seed_company(&db, "c1", "u1");
        let approver = seed_user(&db, "c1", "u2", Role::Member);
        insert_document(&db, "d1", &clerk, DocumentStatus::ForReview, None);
        let approval = match toggle_approver(&db, &clerk, "d1", &approver.id).unwrap() {
            ApprovalState::Added(approval) => approval,
            other => panic!("unexpected {:?}", other),
        };

        assert!(matches!(
            set_approval_status(&db, &clerk, &approval.id, ApprovalStatus::Approved),
            Err(AppError::Forbidden(_))
        ));

        let approved = set_approval_status(&db, &approver, &approval.id, ApprovalStatus::Approved).unwrap();
        assert_eq!(approved.status, ApprovalStatus::Approved);
        let reverted = set_approval_status(&db, &approver, &approval.id, ApprovalStatus::Pending).unwrap();
        assert_eq!(reverted.status, ApprovalStatus::Pending);
    }

    #[test]
    fn summary_counts_required_approvals() {
        let now = now_rfc3339();
        let approval = |status, removable| Approval {
            id: new_id(),
            approvable_id: "d1".into(),
            approver_id: new_id(),
            status,
            removable,
            created_at: now.clone(),
            updated_at: now.clone(),
        };

        let summary = approval_summary(&[
            approval(ApprovalStatus::Approved, false),
            approval(ApprovalStatus::Pending, true),
            approval(ApprovalStatus::Rejected, true),
        ]);
        assert_eq!(summary.total, 3);
        assert_eq!((summary.approved, summary.pending, summary.rejected), (1, 1, 1));
        assert!(summary.all_required_approved);

        let summary = approval_summary(&[approval(ApprovalStatus::Pending, false)]);
        assert!(!summary.all_required_approved);
    }

    #[test]
    fn default_approvers_need_an_admin() {
        let db = Database::open_in_memory().unwrap();
        let (_, member) = seed_company(&db, "c1", "u1");
        let admin = seed_user(&db, "c1", "u2", Role::Admin);

        assert!(matches!(
            set_default_approvers(&db, &member, "c1", vec!["u1".into()]),
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            set_default_approvers(&db, &admin, "c1", vec!["nobody".into()]),
            Err(AppError::BadRequest(_))
        ));

        let (_, _) = seed_company(&db, "c2", "u3");
        let rival = seed_user(&db, "c2", "rival", Role::Admin);
        assert!(matches!(
            set_default_approvers(&db, &rival, "c1", vec!["u1".into()]),
            Err(AppError::Forbidden(_))
        ));

        let company = set_default_approvers(&db, &admin, "c1", vec!["u1".into(), "u2".into()]).unwrap();
        assert_eq!(company.default_approver_ids, vec!["u1".to_string(), "u2".to_string()]);
        assert_eq!(
            db.get_company("c1").unwrap().unwrap().default_approver_ids,
            company.default_approver_ids
        );
    }
}
