//! Impact analysis of a submitted change request.
//!
//! Two units of work: [`analyze_impact`] is the parser stage and commits the
//! workflow transition; [`enrich_impact`] is the optional LLM stage, whose
//! latency or failure never holds up the workflow.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde_json::json;
use tracing::{debug, info, warn};

use crate::errors::{RippleError, RippleResult, WorkflowError};
use crate::impact::diff::generate_diff;
use crate::impact::llm::{annotate, LlmFinding};
use crate::impact::propagator::{build_impacts, changed_exports, find_affected_components};
use crate::indexer::dependencies::{ExportIndex, IndexedFile};
use crate::models::{ChangeRequest, ChangeStatus, ParsedFile, ProjectFile};
use crate::store::events;
use crate::tasks::TaskContext;

/// Input of the LLM stage, produced by the parser stage.
#[derive(Clone, Debug, PartialEq)]
pub struct EnrichmentJob {
    pub change_request_id: String,
    pub author_id: String,
    /// `---/+++` blocks of every drafted file.
    pub diff: String,
    pub affected_files: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ImpactReport {
    pub status: ChangeStatus,
    pub changed_symbols: BTreeSet<String>,
    pub affected_components: Vec<String>,
    pub impacts: usize,
    /// `None` when no LLM client is configured.
    pub enrichment: Option<EnrichmentJob>,
}

/// Exports of the drafted content, or `None` when the language is not
/// supported or parsing failed.
fn parse_draft(ctx: &TaskContext, file: &ProjectFile, content: &str) -> Option<ParsedFile> {
    match ctx.registry.parse_file(&file.path, content.as_bytes()) {
        Ok(outcome) => outcome.map(|o| o.parsed),
        Err(e) => {
            warn!("could not parse draft of {}: {e}", file.path);
            None
        }
    }
}

/// Parser stage: diff and parse the author's active drafts, derive the
/// changed exports, materialize one impact per affected contributor, flag
/// affected components and move the request to `analysis_complete` (or
/// straight to `pending_review` when nothing is affected).
pub fn analyze_impact(ctx: &TaskContext, change_id: &str) -> RippleResult<ImpactReport> {
    let load = || -> RippleResult<ChangeRequest> {
        ctx.db
            .get_change_request(change_id)?
            .ok_or_else(|| RippleError::NotFound(format!("change request {change_id}")))
    };
    let not_pending = |status: ChangeStatus| -> RippleError {
        WorkflowError::InvalidTransition {
            status,
            action: "analyze",
        }
        .into()
    };

    let project_id = load()?.project_id;
    let lock = ctx.locks.get(&project_id);
    let _guard = lock.lock();

    // Re-read under the lock; another worker may have analysed it already.
    let change = load()?;
    if change.status != ChangeStatus::PendingAnalysis {
        return Err(not_pending(change.status));
    }

    let drafts = ctx
        .db
        .list_active_drafts(&change.author_id, &change.component_id)?;
    let mut changed_symbols = BTreeSet::new();
    let mut content_changed = false;
    let mut diff_blocks = Vec::with_capacity(drafts.len());
    let mut drafted_paths = Vec::with_capacity(drafts.len());

    for draft in &drafts {
        let Some(file) = ctx.db.get_project_file(&draft.file_id)? else {
            continue;
        };
        let original = match ctx.objects.get(&file.storage_key) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                debug!("no committed content for {}: {e}", file.path);
                String::new()
            }
        };
        let diff = generate_diff(&original, &draft.content);
        content_changed |= !diff.is_empty();
        diff_blocks.push(diff.unified_text(&file.path));

        match parse_draft(ctx, &file, &draft.content) {
            Some(parsed) => {
                changed_symbols.extend(changed_exports(file.parsed_symbols.as_ref(), &parsed));
            }
            // Unparseable draft: every committed export is suspect.
            None => {
                if let Some(committed) = &file.parsed_symbols {
                    changed_symbols.extend(committed.exports.iter().map(|e| e.name.clone()));
                }
            }
        }
        drafted_paths.push(file.path);
    }

    let files = ctx.db.list_project_files(&change.project_id)?;
    let index = ExportIndex::build(files.iter().filter_map(IndexedFile::from_project_file));
    let edges_into = ctx
        .db
        .list_edges_into(&change.project_id, &change.component_id)?;
    let affected = find_affected_components(
        &change.component_id,
        &changed_symbols,
        content_changed,
        &edges_into,
        &index,
    );

    let mut contributors = BTreeMap::new();
    for component in &affected {
        let users: Vec<String> = ctx
            .db
            .list_contributors(&component.component_id)?
            .into_iter()
            .map(|c| c.user_id)
            .collect();
        contributors.insert(component.component_id.clone(), users);
    }
    let impacts = build_impacts(&change.id, &affected, &contributors);
    let affected_ids: Vec<String> = affected.iter().map(|a| a.component_id.clone()).collect();

    if !ctx.db.commit_analysis(&change.id, &impacts, &affected_ids)? {
        return Err(not_pending(load()?.status));
    }

    let notified: BTreeSet<&str> = impacts.iter().map(|i| i.contributor_id.as_str()).collect();
    for user in notified {
        ctx.events.publish(
            user,
            events::IMPACT_PARSER_COMPLETE,
            events::change_payload(&change.id),
        );
    }
    ctx.events.publish(
        &change.author_id,
        events::IMPACT_PARSER_COMPLETE,
        events::change_payload(&change.id),
    );

    // No impacts means nothing to acknowledge.
    let status = ctx.workflow().re_evaluate(&change.id)?;

    info!(
        "change {}: {} changed symbol(s), {} affected component(s), {} impact(s)",
        change.id,
        changed_symbols.len(),
        affected_ids.len(),
        impacts.len()
    );

    let enrichment = ctx.llm.as_ref().map(|_| {
        let mut affected_files = drafted_paths.clone();
        for component in &affected {
            for path in component.files() {
                if !affected_files.iter().any(|p| p == path) {
                    affected_files.push(path.to_string());
                }
            }
        }
        EnrichmentJob {
            change_request_id: change.id.clone(),
            author_id: change.author_id.clone(),
            diff: diff_blocks.join("\n"),
            affected_files,
        }
    });

    Ok(ImpactReport {
        status,
        changed_symbols,
        affected_components: affected_ids,
        impacts: impacts.len(),
        enrichment,
    })
}

/// LLM stage. Each impact receives the findings located in its component's
/// files, or every finding when none are. Returns the number of findings.
pub fn enrich_impact(ctx: &TaskContext, job: &EnrichmentJob) -> RippleResult<usize> {
    let Some(client) = ctx.llm.as_ref() else {
        return Ok(0);
    };

    let findings = annotate(client.as_ref(), &job.diff, &job.affected_files);
    if findings.is_empty() {
        ctx.events.publish(
            &job.author_id,
            events::IMPACT_LLM_FAILED,
            events::change_payload(&job.change_request_id),
        );
        return Ok(0);
    }

    let mut component_files: HashMap<String, BTreeSet<String>> = HashMap::new();
    for impact in ctx.db.list_impacts(&job.change_request_id)? {
        if !component_files.contains_key(&impact.component_id) {
            let paths = ctx
                .db
                .list_component_files(&impact.component_id)?
                .into_iter()
                .map(|f| f.path)
                .collect();
            component_files.insert(impact.component_id.clone(), paths);
        }
        let owned = &component_files[&impact.component_id];
        let matched: Vec<&LlmFinding> = findings.iter().filter(|f| owned.contains(&f.file)).collect();
        let annotation = if matched.is_empty() {
            json!(findings)
        } else {
            json!(matched)
        };
        ctx.db.set_llm_annotation(&impact.id, &annotation)?;
    }

    ctx.events.publish(
        &job.author_id,
        events::IMPACT_LLM_COMPLETE,
        events::change_payload(&job.change_request_id),
    );
    info!(
        "change {}: {} LLM finding(s) via {}",
        job.change_request_id,
        findings.len(),
        client.name()
    );
    Ok(findings.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impact::llm::tests::CannedClient;
    use crate::impact::llm::CompletionClient;
    use crate::models::{ComponentStatus, FileDraft, StrictnessMode};
    use crate::store::database::fixtures::seed_file;
    use crate::store::objects::{file_key, ObjectStore};
    use crate::tasks::parsing::parse_project;
    use crate::tasks::tests::{test_context_with_llm, TestContext};
    use std::sync::Arc;

    const UTILS: &str = "export function helper(a: number) { return a; }\n\
                         export function other() { return 1; }\n";
    const APP: &str = "import { helper } from '../x/utils';\n\nexport function run() {\n  return helper(2);\n}\n";

    /// X owns x/utils.ts, Y owns y/app.ts importing `helper`.
    fn project(llm: Option<Arc<dyn CompletionClient>>) -> TestContext {
        project_with(APP, llm)
    }

    fn project_with(app: &str, llm: Option<Arc<dyn CompletionClient>>) -> TestContext {
        let t = test_context_with_llm(StrictnessMode::Full, llm);
        for (component, path, content) in [("X", "x/utils.ts", UTILS), ("Y", "y/app.ts", app)] {
            seed_file(&t.ctx.db, "p1", Some(component), path, None);
            t.objects.put(&file_key("p1", path), content.as_bytes()).unwrap();
        }
        parse_project(&t.ctx, "p1").unwrap();
        t
    }

    fn submit_draft(t: &TestContext, content: &str) -> ChangeRequest {
        let file = t
            .ctx
            .db
            .get_project_file_by_path("p1", "x/utils.ts")
            .unwrap()
            .unwrap();
        t.ctx
            .db
            .insert_draft(&FileDraft::new(&file.id, "author", content))
            .unwrap();
        t.ctx
            .workflow()
            .create("p1", "X", "author", "change helper", "", true)
            .unwrap()
    }

    #[test]
    fn test_helper_change_impacts_each_contributor() {
        let t = project(None);
        let change = submit_draft(
            &t,
            "export function helper(a: number, b: number) { return a + b; }\n\
             export function other() { return 1; }\n",
        );

        let report = analyze_impact(&t.ctx, &change.id).unwrap();
        assert_eq!(report.status, ChangeStatus::AnalysisComplete);
        assert_eq!(report.changed_symbols, BTreeSet::from(["helper".to_string()]));
        assert_eq!(report.affected_components, vec!["Y"]);
        assert_eq!(report.impacts, 2);
        assert!(report.enrichment.is_none());

        let impacts = t.ctx.db.list_impacts(&change.id).unwrap();
        let users: Vec<&str> = impacts.iter().map(|i| i.contributor_id.as_str()).collect();
        assert_eq!(users, vec!["alice", "bob"]);
        assert_eq!(impacts[0].affected_lines["y/app.ts"], vec![1, 4]);
        assert_eq!(
            t.ctx.db.get_component("Y").unwrap().unwrap().status,
            ComponentStatus::Flagged
        );
        assert_eq!(
            t.events.recipients(events::IMPACT_PARSER_COMPLETE),
            vec!["alice", "bob", "author"]
        );

        assert!(matches!(
            analyze_impact(&t.ctx, &change.id),
            Err(RippleError::Workflow(WorkflowError::InvalidTransition { .. }))
        ));
    }

    #[test]
    fn test_untouched_exports_go_straight_to_review() {
        let t = project(None);
        let change = submit_draft(
            &t,
            "export function helper(a: number) { return a; }\n\
             export function other() { return 2; }\n",
        );
        let report = analyze_impact(&t.ctx, &change.id).unwrap();
        assert!(report.changed_symbols.is_empty());
        assert_eq!(report.impacts, 0);
        assert_eq!(report.status, ChangeStatus::PendingReview);
        assert_eq!(
            t.events.recipients(events::CHANGE_PENDING_REVIEW),
            vec!["author"]
        );
    }

    #[test]
    fn test_body_edit_reaches_namespace_importer() {
        let app = "import * as u from '../x/utils';\n\nexport function run() {\n  return u.helper(2);\n}\n";
        let t = project_with(app, None);
        let change = submit_draft(
            &t,
            "export function helper(a: number) { return a * 2; }\n\
             export function other() { return 1; }\n",
        );

        let report = analyze_impact(&t.ctx, &change.id).unwrap();
        assert!(report.changed_symbols.is_empty());
        assert_eq!(report.affected_components, vec!["Y"]);
        assert_eq!(report.impacts, 2);
        assert_eq!(report.status, ChangeStatus::AnalysisComplete);

        let impacts = t.ctx.db.list_impacts(&change.id).unwrap();
        assert_eq!(impacts[0].affected_lines["y/app.ts"], vec![1, 4]);
    }

    #[test]
    fn test_concurrent_analysis_records_impacts_once() {
        let t = project(None);
        let change = submit_draft(
            &t,
            "export function helper(a: number, b: number) { return a + b; }\n\
             export function other() { return 1; }\n",
        );

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let ctx = Arc::clone(&t.ctx);
                let id = change.id.clone();
                std::thread::spawn(move || analyze_impact(&ctx, &id))
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results.iter().any(|r| matches!(
            r,
            Err(RippleError::Workflow(WorkflowError::InvalidTransition { .. }))
        )));
        assert_eq!(t.ctx.db.list_impacts(&change.id).unwrap().len(), 2);
    }

    #[test]
    fn test_enrichment_attaches_findings_by_component() {
        let reply = r#"[
            {"file": "y/app.ts", "line": 4, "reason": "passes one argument", "suggested_fix": "add b", "confidence": 0.9},
            {"file": "z/elsewhere.ts", "line": 1, "reason": "maybe", "confidence": 0.2}
        ]"#;
        let client: Arc<dyn CompletionClient> = Arc::new(CannedClient {
            reply: Some(reply.to_string()),
        });
        let t = project(Some(client));
        let change = submit_draft(&t, "export function helper() { return 0; }\n");

        let report = analyze_impact(&t.ctx, &change.id).unwrap();
        let job = report.enrichment.unwrap();
        assert!(job.diff.starts_with("--- x/utils.ts\n+++ x/utils.ts\n"));
        assert_eq!(job.affected_files, vec!["x/utils.ts", "y/app.ts"]);

        assert_eq!(enrich_impact(&t.ctx, &job).unwrap(), 2);
        for impact in t.ctx.db.list_impacts(&change.id).unwrap() {
            let annotation = impact.llm_annotation.unwrap();
            assert_eq!(annotation.as_array().unwrap().len(), 1);
            assert_eq!(annotation[0]["file"], "y/app.ts");
        }
        assert_eq!(t.events.recipients(events::IMPACT_LLM_COMPLETE), vec!["author"]);
    }

    #[test]
    fn test_enrichment_failure_leaves_workflow_alone() {
        let client: Arc<dyn CompletionClient> = Arc::new(CannedClient { reply: None });
        let t = project(Some(client));
        let change = submit_draft(&t, "export function helper() { return 0; }\n");

        let report = analyze_impact(&t.ctx, &change.id).unwrap();
        let job = report.enrichment.unwrap();
        assert_eq!(enrich_impact(&t.ctx, &job).unwrap(), 0);
        assert_eq!(t.events.recipients(events::IMPACT_LLM_FAILED), vec!["author"]);

        let stored = t.ctx.db.get_change_request(&change.id).unwrap().unwrap();
        assert_eq!(stored.status, ChangeStatus::AnalysisComplete);
        assert!(t
            .ctx
            .db
            .list_impacts(&change.id)
            .unwrap()
            .iter()
            .all(|i| i.llm_annotation.is_none()));
    }

    #[test]
    fn test_full_flow_to_approval() {
        let t = project(None);
        let change = submit_draft(&t, "export function helper(a: string) { return a; }\n");
        analyze_impact(&t.ctx, &change.id).unwrap();

        let wf = t.ctx.workflow();
        for impact in t.ctx.db.list_impacts(&change.id).unwrap() {
            wf.acknowledge(&impact.id, &impact.contributor_id).unwrap();
        }
        let outcome = t.ctx.approve_change(&change.id, "owner").unwrap();
        assert_eq!(outcome.promoted_paths, vec!["x/utils.ts"]);
        assert_eq!(
            t.ctx.db.get_component("Y").unwrap().unwrap().status,
            ComponentStatus::Stable
        );
        // Rebuilt from the promoted snapshot, which still exports helper.
        let edges = t.ctx.db.list_edges("p1").unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].symbols, BTreeSet::from(["helper".to_string()]));
    }
}
