//! Change-request state machine.
//!
//! `draft -> pending_analysis -> analysis_complete -> pending_review ->
//! {approved | rejected}`. Refused actions return a [`WorkflowError`] and
//! leave every stored record untouched.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::errors::{RippleError, RippleResult, WorkflowError};
use crate::indexer::filesystem::compute_content_hash;
use crate::indexer::parser::ParserRegistry;
use crate::models::{
    ChangeImpact, ChangeRequest, ChangeStatus, DetectionMethod, FileDraft, Project, StrictnessMode,
};
use crate::store::database::{ApprovalCommit, Database, PromotedFile};
use crate::store::events::{self, EventSink};
use crate::store::objects::{revision_key, ObjectStore};

/// Result of a completed approval.
#[derive(Clone, Debug, PartialEq)]
pub struct ApprovalOutcome {
    pub snapshot_id: String,
    pub promoted_paths: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SweepReport {
    pub confirmed: usize,
    pub re_evaluated: Vec<String>,
}

pub struct Workflow<'a> {
    db: &'a Database,
    objects: &'a dyn ObjectStore,
    events: &'a dyn EventSink,
    registry: &'a ParserRegistry,
}

impl<'a> Workflow<'a> {
    pub fn new(
        db: &'a Database,
        objects: &'a dyn ObjectStore,
        events: &'a dyn EventSink,
        registry: &'a ParserRegistry,
    ) -> Self {
        Self {
            db,
            objects,
            events,
            registry,
        }
    }

    fn change(&self, change_id: &str) -> RippleResult<ChangeRequest> {
        self.db
            .get_change_request(change_id)?
            .ok_or_else(|| RippleError::NotFound(format!("change request {change_id}")))
    }

    fn project(&self, project_id: &str) -> RippleResult<Project> {
        self.db
            .get_project(project_id)?
            .ok_or_else(|| RippleError::NotFound(format!("project {project_id}")))
    }

    fn impact(&self, impact_id: &str) -> RippleResult<ChangeImpact> {
        self.db
            .get_impact(impact_id)?
            .ok_or_else(|| RippleError::NotFound(format!("impact {impact_id}")))
    }

    fn require_owner(&self, project: &Project, user_id: &str, action: &'static str) -> RippleResult<()> {
        if project.owner_id != user_id {
            return Err(WorkflowError::Unauthorized {
                user_id: user_id.to_string(),
                action,
            }
            .into());
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Creation and submission
    // -----------------------------------------------------------------------

    /// Record a change request for `component_id`. Unsubmitted requests
    /// start as `draft`; submitted ones wait for analysis.
    pub fn create(
        &self,
        project_id: &str,
        component_id: &str,
        author_id: &str,
        title: &str,
        description: &str,
        submit: bool,
    ) -> RippleResult<ChangeRequest> {
        let component = self
            .db
            .get_component(component_id)?
            .filter(|c| c.project_id == project_id)
            .ok_or_else(|| {
                RippleError::NotFound(format!("component {component_id} in project {project_id}"))
            })?;

        let mut change = ChangeRequest::new(project_id, &component.id, author_id, title);
        change.description = description.to_string();
        if !submit {
            change.status = ChangeStatus::Draft;
        }
        self.db.insert_change_request(&change)?;
        info!(
            "change request {} created on {} ({})",
            change.id, component.name, change.status
        );
        Ok(change)
    }

    /// Move a draft request into analysis. Only its author may submit.
    pub fn submit(&self, change_id: &str, user_id: &str) -> RippleResult<ChangeRequest> {
        let mut change = self.change(change_id)?;
        if change.author_id != user_id {
            return Err(WorkflowError::Unauthorized {
                user_id: user_id.to_string(),
                action: "submit",
            }
            .into());
        }
        if change.status != ChangeStatus::Draft {
            return Err(WorkflowError::InvalidTransition {
                status: change.status,
                action: "submit",
            }
            .into());
        }
        self.db
            .update_change_status(change_id, ChangeStatus::PendingAnalysis)?;
        change.status = ChangeStatus::PendingAnalysis;
        Ok(change)
    }

    // -----------------------------------------------------------------------
    // Impact resolution
    // -----------------------------------------------------------------------

    fn check_resolvable(
        &self,
        impact: &ChangeImpact,
        user_id: &str,
        action: &'static str,
    ) -> RippleResult<()> {
        if impact.contributor_id != user_id {
            return Err(WorkflowError::Unauthorized {
                user_id: user_id.to_string(),
                action,
            }
            .into());
        }
        if impact.is_resolved() {
            return Err(WorkflowError::AlreadyResolved(impact.id.clone()).into());
        }
        let change = self.change(&impact.change_request_id)?;
        if change.status.is_terminal() {
            return Err(WorkflowError::InvalidTransition {
                status: change.status,
                action,
            }
            .into());
        }
        Ok(())
    }

    /// The impact's own contributor confirms they have seen it.
    pub fn acknowledge(&self, impact_id: &str, user_id: &str) -> RippleResult<ChangeStatus> {
        let impact = self.impact(impact_id)?;
        self.check_resolvable(&impact, user_id, "acknowledge")?;
        if !self.db.acknowledge_impact(impact_id, Utc::now(), false)? {
            return Err(WorkflowError::AlreadyResolved(impact_id.to_string()).into());
        }
        self.re_evaluate(&impact.change_request_id)
    }

    /// Dismiss an impact the contributor considers spurious. Structural
    /// (parser) detections cannot be dismissed.
    pub fn dismiss(&self, impact_id: &str, user_id: &str) -> RippleResult<ChangeStatus> {
        let impact = self.impact(impact_id)?;
        self.check_resolvable(&impact, user_id, "dismiss")?;
        if impact.detection_method == DetectionMethod::Parser {
            return Err(WorkflowError::DismissalNotAllowed.into());
        }
        if !self.db.dismiss_impact(impact_id, Utc::now())? {
            return Err(WorkflowError::AlreadyResolved(impact_id.to_string()).into());
        }
        self.re_evaluate(&impact.change_request_id)
    }

    /// Advance `analysis_complete` to `pending_review` once every impact is
    /// resolved. Any other status is returned unchanged.
    pub fn re_evaluate(&self, change_id: &str) -> RippleResult<ChangeStatus> {
        let change = self.change(change_id)?;
        if change.status != ChangeStatus::AnalysisComplete {
            return Ok(change.status);
        }
        let unresolved = self
            .db
            .list_impacts(change_id)?
            .iter()
            .filter(|i| !i.is_resolved())
            .count();
        if unresolved > 0 {
            debug!("change {change_id}: {unresolved} impact(s) unresolved");
            return Ok(change.status);
        }
        self.db
            .update_change_status(change_id, ChangeStatus::PendingReview)?;
        self.events.publish(
            &change.author_id,
            events::CHANGE_PENDING_REVIEW,
            events::change_payload(change_id),
        );
        info!("change {change_id} is ready for review");
        Ok(ChangeStatus::PendingReview)
    }

    // -----------------------------------------------------------------------
    // Approval / rejection
    // -----------------------------------------------------------------------

    /// Resolve a draft's file and reparse its content. Writes nothing.
    fn prepare_promotion(
        &self,
        project_id: &str,
        draft: &FileDraft,
    ) -> RippleResult<(PromotedFile, String)> {
        let file = self
            .db
            .get_project_file(&draft.file_id)?
            .filter(|f| f.project_id == project_id)
            .ok_or_else(|| RippleError::NotFound(format!("project file {}", draft.file_id)))?;

        let bytes = draft.content.as_bytes();
        let parsed_symbols = match self.registry.parse_file(&file.path, bytes) {
            Ok(outcome) => outcome.map(|o| {
                let mut parsed = o.parsed;
                parsed.path = file.path.clone();
                parsed
            }),
            Err(e) => {
                warn!("could not reparse promoted draft {}: {e}", file.path);
                None
            }
        };

        Ok((
            PromotedFile {
                file_id: file.id.clone(),
                draft_id: draft.id.clone(),
                storage_key: revision_key(project_id, &draft.id, &file.path),
                content_hash: compute_content_hash(bytes),
                size_bytes: i64::try_from(bytes.len()).unwrap_or(i64::MAX),
                parsed_symbols,
            },
            file.path,
        ))
    }

    /// Write promoted bytes under their revision keys and commit. On failure
    /// the revision objects written so far are removed; committed objects
    /// are never touched.
    fn write_and_commit(
        &self,
        drafts: &[FileDraft],
        commit: &ApprovalCommit,
    ) -> RippleResult<String> {
        let mut written: Vec<&str> = Vec::with_capacity(commit.promoted.len());
        let mut stored: RippleResult<()> = Ok(());
        for (promoted, draft) in commit.promoted.iter().zip(drafts) {
            if let Err(e) = self
                .objects
                .put(&promoted.storage_key, draft.content.as_bytes())
            {
                stored = Err(e);
                break;
            }
            written.push(&promoted.storage_key);
        }
        let result = stored.and_then(|()| self.db.commit_approval(commit));

        if result.is_err() {
            for key in written {
                if let Err(e) = self.objects.delete(key) {
                    warn!("could not remove revision object {key}: {e}");
                }
            }
        }
        result
    }

    /// Owner-only. Under `full` strictness every impact must be resolved.
    /// Promotes the author's active drafts, snapshots the project and
    /// returns affected components to `stable`. A failure leaves the request,
    /// its files and their committed objects as they were.
    pub fn approve(&self, change_id: &str, user_id: &str) -> RippleResult<ApprovalOutcome> {
        let change = self.change(change_id)?;
        let project = self.project(&change.project_id)?;
        self.require_owner(&project, user_id, "approve")?;
        if !matches!(
            change.status,
            ChangeStatus::AnalysisComplete | ChangeStatus::PendingReview
        ) {
            return Err(WorkflowError::InvalidTransition {
                status: change.status,
                action: "approve",
            }
            .into());
        }

        let impacts = self.db.list_impacts(change_id)?;
        if project.strictness_mode == StrictnessMode::Full {
            let unresolved = impacts.iter().filter(|i| !i.is_resolved()).count();
            if unresolved > 0 {
                return Err(WorkflowError::UnresolvedImpacts { unresolved }.into());
            }
        }

        let drafts = self
            .db
            .list_active_drafts(&change.author_id, &change.component_id)?;
        let mut promoted = Vec::with_capacity(drafts.len());
        let mut promoted_paths = Vec::with_capacity(drafts.len());
        for draft in &drafts {
            let (file, path) = self.prepare_promotion(&project.id, draft)?;
            promoted.push(file);
            promoted_paths.push(path);
        }

        let commit = ApprovalCommit {
            project_id: project.id.clone(),
            change_request_id: change.id.clone(),
            promoted,
            stabilize: self.db.affected_component_ids(change_id)?,
            resolved_at: Utc::now(),
        };
        let snapshot_id = self.write_and_commit(&drafts, &commit)?;

        self.notify(&change, &impacts, events::CHANGE_APPROVED);
        info!(
            "change {} approved: {} file(s) promoted, snapshot {}",
            change.id,
            promoted_paths.len(),
            snapshot_id
        );
        Ok(ApprovalOutcome {
            snapshot_id,
            promoted_paths,
        })
    }

    /// Owner-only; terminal. Affected components return to `stable`.
    pub fn reject(&self, change_id: &str, user_id: &str) -> RippleResult<()> {
        let change = self.change(change_id)?;
        let project = self.project(&change.project_id)?;
        self.require_owner(&project, user_id, "reject")?;
        if change.status.is_terminal() {
            return Err(WorkflowError::InvalidTransition {
                status: change.status,
                action: "reject",
            }
            .into());
        }
        let impacts = self.db.list_impacts(change_id)?;
        self.db.commit_rejection(
            change_id,
            &self.db.affected_component_ids(change_id)?,
            Utc::now(),
        )?;
        self.notify(&change, &impacts, events::CHANGE_REJECTED);
        info!("change {change_id} rejected");
        Ok(())
    }

    /// Author first, then each impacted contributor once.
    fn notify(&self, change: &ChangeRequest, impacts: &[ChangeImpact], event: &str) {
        let mut recipients = vec![change.author_id.as_str()];
        let mut seen: BTreeSet<&str> = recipients.iter().copied().collect();
        for impact in impacts {
            if seen.insert(impact.contributor_id.as_str()) {
                recipients.push(impact.contributor_id.as_str());
            }
        }
        for user in recipients {
            self.events
                .publish(user, event, events::change_payload(&change.id));
        }
    }

    // -----------------------------------------------------------------------
    // Aging sweep
    // -----------------------------------------------------------------------

    /// Auto-acknowledge every unresolved impact whose open change request is
    /// older than `threshold` at `now`, then re-evaluate each touched request.
    /// Re-running with the same inputs confirms nothing further.
    pub fn autoconfirm_sweep(&self, now: DateTime<Utc>, threshold: Duration) -> RippleResult<SweepReport> {
        let cutoff = now - threshold;
        let mut report = SweepReport::default();
        let mut touched = BTreeSet::new();

        for (impact, created_at) in self.db.list_open_unresolved_impacts()? {
            if created_at > cutoff {
                continue;
            }
            if self.db.acknowledge_impact(&impact.id, now, true)? {
                report.confirmed += 1;
                touched.insert(impact.change_request_id);
            }
        }

        for change_id in touched {
            self.re_evaluate(&change_id)?;
            report.re_evaluated.push(change_id);
        }
        if report.confirmed > 0 {
            info!(
                "auto-confirmed {} impact(s) across {} change request(s)",
                report.confirmed,
                report.re_evaluated.len()
            );
        }
        Ok(report)
    }
}
