use crate::core::catalog::{Heuristic, RuleCatalog};
use crate::core::rules::Rule;
use crate::domain::model::{FieldPath, FieldProfile, ObservedType, StructuralSummary};
use crate::domain::ports::RulePlanner;
use crate::utils::error::{EtlError, Result};
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};

/// Ordered rule list plus the record of how it was derived.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Plan {
    pub rules: Vec<Rule>,
    pub log: PlanningLog,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct PlanningLog {
    pub entries: Vec<PlanEntry>,
    pub conflicts: Vec<PlanConflict>,
}

/// Why a rule was emitted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanEntry {
    pub heuristic: Heuristic,
    pub path: String,
    pub rule: Rule,
    pub note: String,
}

/// Two candidate rules competed for one path; `kept` won by catalog priority.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanConflict {
    pub path: String,
    pub kept: String,
    pub discarded: String,
    pub reason: String,
}

impl PlanningLog {
    fn emit(&mut self, rules: &mut Vec<Rule>, heuristic: Heuristic, path: String, rule: Rule, note: String) {
        tracing::debug!("💡 {:?} on '{}': {} ({})", heuristic, path, rule, note);
        self.entries.push(PlanEntry {
            heuristic,
            path,
            rule: rule.clone(),
            note,
        });
        rules.push(rule);
    }

    fn conflict(&mut self, path: String, kept: String, discarded: String, reason: String) {
        tracing::warn!(
            "💡 Conflict on '{}': kept {}, discarded {} ({})",
            path,
            kept,
            discarded,
            reason
        );
        self.conflicts.push(PlanConflict {
            path,
            kept,
            discarded,
            reason,
        });
    }
}

struct RenameProposal<'a> {
    path: &'a FieldPath,
    from: String,
    to: String,
    priority: i32,
    depth: usize,
    alias: String,
}

/// Derives the ordered rule list for a summary.
///
/// Heuristics run in catalog priority order and every iteration is sorted by
/// field path, so the same summary and catalog always give the same plan.
pub fn plan(summary: &StructuralSummary, catalog: &RuleCatalog) -> Result<Plan> {
    let aliases = catalog.alias_paths()?;
    let coercions = catalog.compiled_coercions()?;
    let separator = catalog.separator.as_str();

    let mut rules = Vec::new();
    let mut log = PlanningLog::default();

    // 每個 leaf path 目前對應的欄位名稱
    let mut columns: BTreeMap<&FieldPath, String> = summary
        .fields
        .keys()
        .map(|path| (path, path.to_string()))
        .collect();

    // 1. nested objects → flatten, deepest prefix first
    if catalog.is_enabled(Heuristic::NestedObjectPrefix) {
        let mut prefixes: Vec<&FieldPath> = summary.objects.iter().collect();
        prefixes.sort_by(|a, b| b.depth().cmp(&a.depth()).then_with(|| a.cmp(b)));

        // 撞名的路徑保留點號名稱，之後的規則都以它為準
        let mut pinned: BTreeSet<&FieldPath> = BTreeSet::new();

        for prefix in prefixes {
            let replacement = format!("{}{}", prefix.join(separator), separator);
            let moving = Rule::Flatten {
                prefix: prefix.clone(),
                replacement: replacement.clone(),
                except: Vec::new(),
            };
            let mut taken: BTreeSet<String> = columns.values().cloned().collect();
            let mut except = Vec::new();
            let mut moved = 0;

            for (path, name) in columns.iter_mut() {
                let Some(target) = moving.renamed(name) else {
                    continue;
                };
                if pinned.contains(*path) {
                    except.push((*path).clone());
                    continue;
                }
                if taken.contains(&target) {
                    log.conflict(
                        path.to_string(),
                        format!("column '{}'", target),
                        format!("{} as '{}'", path, target),
                        "paths collide after flattening; the flattened path keeps its dotted name"
                            .to_string(),
                    );
                    pinned.insert(*path);
                    except.push((*path).clone());
                    continue;
                }
                taken.insert(target.clone());
                *name = target;
                moved += 1;
            }

            log.emit(
                &mut rules,
                Heuristic::NestedObjectPrefix,
                prefix.to_string(),
                Rule::Flatten {
                    prefix: prefix.clone(),
                    replacement,
                    except,
                },
                format!("nested object; {} leaf paths moved", moved),
            );
        }
    }

    // 2. known prefix aliases → rename
    if catalog.is_enabled(Heuristic::KnownPrefixAliases) {
        let mut proposals = Vec::new();

        for path in summary.fields.keys() {
            let mut candidates: Vec<_> = aliases
                .iter()
                .filter_map(|(prefix, alias)| {
                    let rest = path.strip_prefix(prefix).filter(|rest| !rest.is_empty())?;
                    Some((prefix, *alias, rest))
                })
                .collect();
            if candidates.is_empty() {
                continue;
            }
            candidates.sort_by(|a, b| {
                Reverse(a.1.priority)
                    .cmp(&Reverse(b.1.priority))
                    .then_with(|| Reverse(a.0.depth()).cmp(&Reverse(b.0.depth())))
                    .then_with(|| a.0.cmp(b.0))
                    .then_with(|| a.1.alias.cmp(&b.1.alias))
            });

            let from = columns[path].clone();
            let to_for = |alias: &str, rest: &[String]| {
                format!("{}{}{}", alias, separator, rest.join(separator))
            };
            let (win_prefix, winner, win_rest) = &candidates[0];
            let to = to_for(&winner.alias, win_rest);

            for (prefix, alias, rest) in &candidates[1..] {
                log.conflict(
                    path.to_string(),
                    format!("rename({} -> {})", from, to),
                    format!("rename({} -> {})", from, to_for(&alias.alias, rest)),
                    format!(
                        "alias '{}' (priority {}) outranks '{}' (priority {})",
                        win_prefix, winner.priority, prefix, alias.priority
                    ),
                );
            }

            if to != from {
                proposals.push(RenameProposal {
                    path,
                    from,
                    to,
                    priority: winner.priority,
                    depth: win_prefix.depth(),
                    alias: format!("{} → {}", win_prefix, winner.alias),
                });
            }
        }

        proposals.sort_by(|a, b| {
            Reverse(a.priority)
                .cmp(&Reverse(b.priority))
                .then_with(|| Reverse(a.depth).cmp(&Reverse(b.depth)))
                .then_with(|| a.path.cmp(b.path))
        });

        let mut taken: BTreeSet<String> = columns.values().cloned().collect();
        let mut accepted = Vec::new();
        for proposal in proposals {
            if taken.contains(&proposal.to) {
                log.conflict(
                    proposal.path.to_string(),
                    format!("column '{}'", proposal.to),
                    format!("rename({} -> {})", proposal.from, proposal.to),
                    "rename target is already taken by another column".to_string(),
                );
                continue;
            }
            taken.insert(proposal.to.clone());
            accepted.push(proposal);
        }

        accepted.sort_by(|a, b| a.path.cmp(b.path));
        for proposal in accepted {
            columns.insert(proposal.path, proposal.to.clone());
            log.emit(
                &mut rules,
                Heuristic::KnownPrefixAliases,
                proposal.path.to_string(),
                Rule::Rename {
                    from: proposal.from,
                    to: proposal.to,
                },
                format!("alias {}", proposal.alias),
            );
        }
    }

    // 3. arrays → drop
    let mut dropped: BTreeSet<&FieldPath> = BTreeSet::new();
    if catalog.is_enabled(Heuristic::ArrayField) {
        for field in summary.array_fields() {
            dropped.insert(&field.path);
            log.emit(
                &mut rules,
                Heuristic::ArrayField,
                field.path.to_string(),
                Rule::Drop {
                    column: columns[&field.path].clone(),
                },
                "array elements are not flattened".to_string(),
            );
        }
    }

    let column_owner = |column: &str| -> Option<&FieldProfile> {
        columns
            .iter()
            .find(|(_, name)| name.as_str() == column)
            .and_then(|(path, _)| summary.get(path))
    };

    // 4. expected columns → fill default
    let mut filled: Vec<String> = Vec::new();
    if catalog.is_enabled(Heuristic::PathMissingInSummary) {
        for (column, value) in &catalog.defaults {
            let rule = Rule::FillDefault {
                column: column.clone(),
                value: value.clone(),
            };
            let note = match column_owner(column) {
                Some(owner) if dropped.contains(&owner.path) => {
                    log.conflict(
                        owner.path.to_string(),
                        format!("drop({})", column),
                        rule.to_string(),
                        "structural drop outranks value fill".to_string(),
                    );
                    continue;
                }
                Some(owner) if owner.is_optional => {
                    format!("optional in {} of {} samples", owner.occurrences, summary.sample_count)
                }
                Some(owner) if owner.is_nullable => "null in the samples".to_string(),
                Some(_) => "present in the samples; guards unseen records".to_string(),
                None => "absent from the summary".to_string(),
            };
            filled.push(column.clone());
            log.emit(&mut rules, Heuristic::PathMissingInSummary, column.clone(), rule, note);
        }
    }

    // 5. numeric target columns → coerce
    let mut coerced: BTreeSet<String> = BTreeSet::new();
    if catalog.is_enabled(Heuristic::NumericTargetColumn) {
        let mut targets: Vec<(String, String)> = Vec::new();
        for (path, name) in &columns {
            if dropped.contains(path) {
                if let Some((_, spec)) = coercions.iter().find(|(re, _)| re.is_match(name)) {
                    log.conflict(
                        path.to_string(),
                        format!("drop({})", name),
                        format!("coerce_type({}: {})", name, spec.target),
                        "structural drop outranks value coercion".to_string(),
                    );
                }
                continue;
            }
            targets.push((path.to_string(), name.clone()));
        }
        for column in &filled {
            if !targets.iter().any(|(_, name)| name == column) {
                targets.push((column.clone(), column.clone()));
            }
        }

        for (path, column) in targets {
            let mut matching: Vec<_> = coercions.iter().filter(|(re, _)| re.is_match(&column)).collect();
            if matching.is_empty() {
                continue;
            }
            matching.sort_by(|a, b| {
                Reverse(a.1.priority)
                    .cmp(&Reverse(b.1.priority))
                    .then_with(|| a.1.column.cmp(&b.1.column))
            });
            let winner = matching[0].1;
            let rule = Rule::CoerceType {
                column: column.clone(),
                target: winner.target,
                on_error: winner.policy(),
            };
            for (_, loser) in &matching[1..] {
                log.conflict(
                    path.clone(),
                    rule.to_string(),
                    format!("coerce_type({}: {})", column, loser.target),
                    format!(
                        "pattern '{}' (priority {}) outranks '{}' (priority {})",
                        winner.column, winner.priority, loser.column, loser.priority
                    ),
                );
            }
            coerced.insert(column.clone());
            log.emit(
                &mut rules,
                Heuristic::NumericTargetColumn,
                path,
                rule,
                format!("matches pattern '{}'", winner.column),
            );
        }
    }

    // mixed types must be resolved by an explicit coercion
    for field in summary.leaves() {
        let column = &columns[&field.path];
        if field.observed == ObservedType::Mixed
            && !dropped.contains(&field.path)
            && !coerced.contains(column)
        {
            return Err(EtlError::UnresolvableSchema {
                path: field.path.to_string(),
                column: column.clone(),
                observed: field.seen_types_label(),
            });
        }
    }

    tracing::info!(
        "💡 Planned {} rules ({} conflicts resolved)",
        rules.len(),
        log.conflicts.len()
    );

    Ok(Plan { rules, log })
}

/// The deterministic rule engine behind `RulePlanner`.
#[derive(Debug, Clone, Default)]
pub struct CatalogPlanner {
    catalog: RuleCatalog,
}

impl CatalogPlanner {
    pub fn new(catalog: RuleCatalog) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &RuleCatalog {
        &self.catalog
    }
}

impl RulePlanner for CatalogPlanner {
    fn plan(&self, summary: &StructuralSummary) -> Result<Plan> {
        plan(summary, &self.catalog)
    }
}
