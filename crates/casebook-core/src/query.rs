//! # Query Engine
//!
//! Evaluates parsed filters over one kind's table. Soft-deleted rows are
//! never part of the universe, so a negated filter is the exact complement
//! of its positive form among live rows. The total is taken before paging.

use casebook_rbac::{bypasses_all, decide, AccessFacts, PermissionLevel, Principal};
use serde_json::Value;
use std::cmp::Ordering;

use crate::error::{CoreError, CoreResult};
use crate::filter::{Filter, Literal};
use crate::permission::resolve_in;
use crate::record::{Page, QueryResult, Record, Sort};
use crate::schema::{EntitySchema, FieldType};
use crate::store::Tables;

/// Which rows a caller may see.
#[derive(Debug, Clone, Copy)]
pub enum Scope<'a> {
    /// Every live row
    All,
    /// Rows the principal can read
    Principal {
        principal: &'a Principal,
        admin_role_id: Option<i64>,
    },
}

impl Scope<'_> {
    fn admits(&self, tables: &Tables, record: &Record) -> bool {
        match *self {
            Scope::All => true,
            Scope::Principal {
                principal,
                admin_role_id,
            } => {
                if bypasses_all(principal, admin_role_id) {
                    return true;
                }
                let facts = AccessFacts {
                    owner: Some(record.owner.as_str()),
                    granted: resolve_in(tables, &principal.roles, record.target()),
                    admin_role_id,
                };
                decide(principal, PermissionLevel::Read, &facts).allowed
            }
        }
    }
}

/// Filter, order and page one kind's rows.
pub(crate) fn run(
    tables: &Tables,
    schema: &EntitySchema,
    filters: &[Filter],
    page: Page,
    limit: usize,
    sort: Option<&Sort>,
    scope: Scope<'_>,
) -> CoreResult<QueryResult> {
    let sort_by = match sort {
        Some(sort) => match schema.field(&sort.field) {
            Some(spec) => Some((sort, spec.ty)),
            None => {
                return Err(CoreError::Validation(format!(
                    "cannot sort {} by unknown field '{}'",
                    schema.kind, sort.field
                )))
            }
        },
        None => None,
    };

    let mut matched: Vec<&Record> = tables
        .rows(schema.kind)
        .filter(|r| !r.deleted)
        .filter(|r| filters.iter().all(|f| f.matches(r, &tables.promotions)))
        .filter(|r| scope.admits(tables, r))
        .collect();

    if let Some((sort, ty)) = sort_by {
        matched.sort_by(|a, b| {
            let ord = compare_values(ty, a.field(&sort.field), b.field(&sort.field));
            let ord = if sort.descending { ord.reverse() } else { ord };
            ord.then(a.id.cmp(&b.id))
        });
    }

    let total = matched.len();
    let rows = matched
        .into_iter()
        .skip(page.skip)
        .take(limit)
        .cloned()
        .collect();

    tracing::trace!(kind = %schema.kind, total, skip = page.skip, limit, "Query evaluated");
    Ok(QueryResult { rows, total })
}

/// Nulls sort first. Values are compared as the column's type, so
/// datetimes order by instant rather than by their text.
fn compare_values(ty: FieldType, a: Option<Value>, b: Option<Value>) -> Ordering {
    let typed = |v: &Option<Value>| v.as_ref().and_then(|v| Literal::from_stored(ty, v));
    match (typed(&a), typed(&b)) {
        (Some(x), Some(y)) => x.compare(&y).unwrap_or(Ordering::Equal),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (None, None) => compare_raw(a, b),
    }
}

/// Fallback for columns with no typed form, such as JSON.
fn compare_raw(a: Option<Value>, b: Option<Value>) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}
