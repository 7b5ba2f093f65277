use crate::{
    db::{Database, Row, decode_entity},
    entity::Entity,
    error::Error,
    key::Key,
    query::{
        QueryError,
        render::{self, QueryMode, RenderedQuery},
    },
    value::Value,
};
use std::{cell::RefCell, fmt, sync::Arc};

///
/// CompareOp
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
    NotIn,
    /// "this column's entity, or any of its ancestors, resolves to the
    /// given key" — all transactions under a category, subcategories
    /// included.
    RefersTo,
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::In => "IN",
            Self::NotIn => "NOT IN",
            Self::RefersTo => "->",
        };
        write!(f, "{symbol}")
    }
}

///
/// Filter
///

#[derive(Clone, Debug)]
pub struct Filter {
    pub(crate) column: String,
    pub(crate) op: CompareOp,
    pub(crate) value: Value,
}

///
/// JoinType
///

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum JoinType {
    #[default]
    Inner,
    Left,
    Right,
}

impl JoinType {
    pub(crate) const fn sql(self) -> &'static str {
        match self {
            Self::Inner => "INNER",
            Self::Left => "LEFT",
            Self::Right => "RIGHT",
        }
    }
}

///
/// Join
///
/// Joins the target kind's table on "reference column of the queried rows
/// points at the joined row's key".
///

#[derive(Clone, Debug)]
pub struct Join {
    pub(crate) kind: String,
    pub(crate) property: String,
    pub(crate) alias: Option<String>,
    pub(crate) join_type: JoinType,
    pub(crate) extra: Option<String>,
}

impl Join {
    #[must_use]
    pub fn new(kind: &str, property: &str) -> Self {
        Self {
            kind: kind.to_string(),
            property: property.to_string(),
            alias: None,
            join_type: JoinType::Inner,
            extra: None,
        }
    }

    #[must_use]
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    #[must_use]
    pub const fn join_type(mut self, join_type: JoinType) -> Self {
        self.join_type = join_type;
        self
    }

    #[must_use]
    pub const fn left(self) -> Self {
        self.join_type(JoinType::Left)
    }

    #[must_use]
    pub const fn right(self) -> Self {
        self.join_type(JoinType::Right)
    }

    /// Extra raw condition AND-ed onto the join's ON clause.
    #[must_use]
    pub fn extra_condition(mut self, extra: impl Into<String>) -> Self {
        self.extra = Some(extra.into());
        self
    }
}

///
/// AggregateFunc
///

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum AggregateFunc {
    #[default]
    Sum,
    Count,
    Avg,
    Min,
    Max,
}

impl AggregateFunc {
    pub(crate) const fn sql(self) -> &'static str {
        match self {
            Self::Sum => "SUM",
            Self::Count => "COUNT",
            Self::Avg => "AVG",
            Self::Min => "MIN",
            Self::Max => "MAX",
        }
    }
}

///
/// Aggregate
///

#[derive(Clone, Debug)]
pub struct Aggregate {
    pub(crate) column: String,
    pub(crate) name: String,
    pub(crate) group_by: Option<String>,
    pub(crate) func: AggregateFunc,
    pub(crate) default: Option<Value>,
}

impl Aggregate {
    #[must_use]
    pub fn new(column: &str, name: &str) -> Self {
        Self {
            column: column.to_string(),
            name: name.to_string(),
            group_by: None,
            func: AggregateFunc::Sum,
            default: None,
        }
    }

    /// Group results by the rows of this kind; the kind must be joined.
    #[must_use]
    pub fn group_by(mut self, kind: &str) -> Self {
        self.group_by = Some(kind.to_string());
        self
    }

    #[must_use]
    pub const fn func(mut self, func: AggregateFunc) -> Self {
        self.func = func;
        self
    }

    /// Value substituted when the aggregate comes up empty — a SUM over
    /// zero rows yields this instead of NULL.
    #[must_use]
    pub fn default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }
}

///
/// Synthetic
///
/// A caller-supplied SQL expression exposed as a named column, visible to
/// subsequent filters, aggregates, and sorts.
///

#[derive(Clone, Debug)]
pub struct Synthetic {
    pub(crate) name: String,
    pub(crate) formula: String,
}

///
/// Sort
///

#[derive(Clone, Debug)]
pub struct Sort {
    pub(crate) column: String,
    pub(crate) ascending: bool,
}

///
/// Scope
///

#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) enum Scope {
    #[default]
    None,
    Key(Key),
    Parent(Option<Key>),
    Ancestor(Key),
}

#[derive(Clone, Debug)]
struct CachedPlan {
    kind: String,
    mode: QueryMode,
    subclasses: bool,
    plan: Arc<RenderedQuery>,
}

///
/// Query
///
/// Declarative query intent against one or more kinds. Builder methods
/// return `&mut Self` for chaining and invalidate any cached render;
/// execution never mutates the AST.
///

#[derive(Debug, Default)]
pub struct Query {
    pub(crate) kinds: Vec<String>,
    pub(crate) include_subclasses: bool,
    pub(crate) keys_only: bool,
    pub(crate) scope: Scope,
    pub(crate) owner: Option<String>,
    pub(crate) filters: Vec<Filter>,
    pub(crate) joins: Vec<Join>,
    pub(crate) aggregates: Vec<Aggregate>,
    pub(crate) synthetics: Vec<Synthetic>,
    pub(crate) sorts: Vec<Sort>,
    pub(crate) limit: Option<u32>,
    plan: RefCell<Option<CachedPlan>>,
}

impl Query {
    #[must_use]
    pub fn new(kind: &str) -> Self {
        Self {
            kinds: vec![kind.to_string()],
            include_subclasses: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn over(kinds: &[&str]) -> Self {
        Self {
            kinds: kinds.iter().map(ToString::to_string).collect(),
            include_subclasses: true,
            ..Self::default()
        }
    }

    fn invalidate(&mut self) {
        *self.plan.borrow_mut() = None;
    }

    // ── Builder surface ────────────────────────────────

    pub fn include_subclasses(&mut self, include: bool) -> &mut Self {
        self.invalidate();
        self.include_subclasses = include;
        self
    }

    pub fn keys_only(&mut self, keys_only: bool) -> &mut Self {
        self.invalidate();
        self.keys_only = keys_only;
        self
    }

    pub fn add_filter(
        &mut self,
        column: &str,
        op: CompareOp,
        value: impl Into<Value>,
    ) -> &mut Self {
        self.invalidate();
        self.filters.push(Filter {
            column: column.to_string(),
            op,
            value: value.into(),
        });
        self
    }

    pub fn add_join(&mut self, join: Join) -> &mut Self {
        self.invalidate();
        self.joins.push(join);
        self
    }

    /// Join the parent kind through the `_parent` column.
    pub fn add_parent_join(&mut self, kind: &str, alias: &str) -> &mut Self {
        self.add_join(Join::new(kind, crate::schema::COL_PARENT).alias(alias))
    }

    pub fn add_aggregate(&mut self, aggregate: Aggregate) -> &mut Self {
        self.invalidate();
        self.aggregates.push(aggregate);
        self
    }

    pub fn add_synthetic_column(&mut self, name: &str, formula: &str) -> &mut Self {
        self.invalidate();
        self.synthetics.push(Synthetic {
            name: name.to_string(),
            formula: formula.to_string(),
        });
        self
    }

    pub fn add_sort(&mut self, column: &str, ascending: bool) -> &mut Self {
        self.invalidate();
        self.sorts.push(Sort {
            column: column.to_string(),
            ascending,
        });
        self
    }

    pub fn set_limit(&mut self, limit: u32) -> &mut Self {
        self.invalidate();
        self.limit = Some(limit);
        self
    }

    pub fn set_owner(&mut self, owner: &str) -> &mut Self {
        self.invalidate();
        self.owner = Some(owner.to_string());
        self
    }

    /// Scope to exactly one key. Mutually exclusive with parent and
    /// ancestor scoping; setting both is a programming error.
    pub fn set_key(&mut self, key: Key) -> &mut Self {
        debug_assert!(
            matches!(self.scope, Scope::None | Scope::Key(_)),
            "key, parent, and ancestor scoping are mutually exclusive"
        );
        self.invalidate();
        self.scope = Scope::Key(key);
        self
    }

    /// Scope to direct children of `parent` (`None` = root entities).
    pub fn set_parent(&mut self, parent: Option<Key>) -> &mut Self {
        debug_assert!(
            matches!(self.scope, Scope::None | Scope::Parent(_)),
            "key, parent, and ancestor scoping are mutually exclusive"
        );
        self.invalidate();
        self.scope = Scope::Parent(parent);
        self
    }

    /// Scope to all transitive descendants of `ancestor`.
    pub fn set_ancestor(&mut self, ancestor: Key) -> &mut Self {
        debug_assert!(
            matches!(self.scope, Scope::None | Scope::Ancestor(_)),
            "key, parent, and ancestor scoping are mutually exclusive"
        );
        self.invalidate();
        self.scope = Scope::Ancestor(ancestor);
        self
    }

    pub fn clear_scope(&mut self) -> &mut Self {
        self.invalidate();
        self.scope = Scope::None;
        self
    }

    pub fn clear_filters(&mut self) -> &mut Self {
        self.invalidate();
        self.filters.clear();
        self
    }

    pub fn clear_sort(&mut self) -> &mut Self {
        self.invalidate();
        self.sorts.clear();
        self
    }

    pub fn clear_limit(&mut self) -> &mut Self {
        self.invalidate();
        self.limit = None;
        self
    }

    #[must_use]
    pub fn has_aggregates(&self) -> bool {
        !self.aggregates.is_empty()
    }

    // ── Execution ──────────────────────────────────────

    fn natural_mode(&self) -> QueryMode {
        if self.has_aggregates() {
            QueryMode::Aggregate
        } else if self.keys_only {
            QueryMode::KeyName
        } else {
            QueryMode::Columns
        }
    }

    /// Concrete target kind names, in declaration order. Abstract kinds
    /// stay in the list when subclasses are included; the renderer expands
    /// them into their concrete subclasses.
    fn kind_list(&self, db: &Database) -> Result<Vec<String>, Error> {
        let registry = db.registry();
        let mut kinds = Vec::new();
        for name in &self.kinds {
            let canonical = registry.resolve_name(name)?;
            let sealed = registry.seal(&canonical)?;
            if sealed.is_abstract() && !self.include_subclasses {
                return Err(QueryError::NoConcreteKinds(canonical).into());
            }
            if !kinds.contains(&canonical) {
                kinds.push(canonical);
            }
        }
        Ok(kinds)
    }

    fn plan_for(
        &self,
        db: &Database,
        kind: &str,
        mode: QueryMode,
    ) -> Result<Arc<RenderedQuery>, Error> {
        if let Some(cached) = self.plan.borrow().as_ref()
            && cached.kind == kind
            && cached.mode == mode
            && cached.subclasses == self.include_subclasses
        {
            return Ok(cached.plan.clone());
        }
        let plan = Arc::new(render::render(
            db.registry(),
            self,
            kind,
            mode,
            self.include_subclasses,
        )?);
        *self.plan.borrow_mut() = Some(CachedPlan {
            kind: kind.to_string(),
            mode,
            subclasses: self.include_subclasses,
            plan: plan.clone(),
        });
        Ok(plan)
    }

    /// Make sure every table this query touches exists.
    fn reconcile_targets(&self, db: &Database, kind: &str) -> Result<(), Error> {
        let registry = db.registry();
        let mut names: Vec<String> = vec![kind.to_string()];
        if self.include_subclasses {
            names.extend(registry.subclasses_of(kind)?);
        }
        for join in &self.joins {
            names.push(registry.resolve_name(&join.kind)?);
        }
        for aggregate in &self.aggregates {
            if let Some(group_by) = &aggregate.group_by {
                names.push(registry.resolve_name(group_by)?);
            }
        }
        for filter in &self.filters {
            if filter.op == CompareOp::RefersTo
                && let Value::Key(key) = &filter.value
            {
                names.push(registry.resolve_name(key.kind())?);
            }
        }
        for name in names {
            let sealed = registry.seal(&name)?;
            db.ensure_reconciled(&sealed)?;
        }
        Ok(())
    }

    /// Execute and decode every matching entity, across all target kinds.
    pub fn fetch_all(&self, db: &Database) -> Result<Vec<Entity>, Error> {
        if self.has_aggregates() {
            return Err(QueryError::AggregateRows.into());
        }
        let tx = db.begin()?;
        let mode = self.natural_mode();
        let mut entities = Vec::new();
        for kind in self.kind_list(db)? {
            self.reconcile_targets(db, &kind)?;
            let plan = self.plan_for(db, &kind, mode)?;
            for row in db.run_select(&plan)? {
                entities.push(decode_entity(db, &row)?);
            }
        }
        tx.commit()?;
        Ok(entities)
    }

    /// Execute and surface raw result rows (the shape aggregate queries
    /// and generic table views consume).
    pub fn fetch_rows(&self, db: &Database) -> Result<Vec<Row>, Error> {
        let tx = db.begin()?;
        let mode = self.natural_mode();
        let mut rows = Vec::new();
        for kind in self.kind_list(db)? {
            self.reconcile_targets(db, &kind)?;
            let plan = self.plan_for(db, &kind, mode)?;
            rows.extend(db.run_select(&plan)?);
        }
        tx.commit()?;
        Ok(rows)
    }

    /// First matching entity, or `None`.
    pub fn get(&self, db: &Database) -> Result<Option<Entity>, Error> {
        if self.has_aggregates() {
            return Err(QueryError::AggregateRows.into());
        }
        let tx = db.begin()?;
        let mode = self.natural_mode();
        let mut found = None;
        for kind in self.kind_list(db)? {
            self.reconcile_targets(db, &kind)?;
            let plan = self.plan_for(db, &kind, mode)?;
            if let Some(row) = db.run_select(&plan)?.into_iter().next() {
                found = Some(decode_entity(db, &row)?);
                break;
            }
        }
        tx.commit()?;
        Ok(found)
    }

    /// Number of matching rows across all target kinds.
    pub fn count(&self, db: &Database) -> Result<i64, Error> {
        let tx = db.begin()?;
        let mut total = 0;
        for kind in self.kind_list(db)? {
            self.reconcile_targets(db, &kind)?;
            let plan = self.plan_for(db, &kind, QueryMode::Count)?;
            let rows = db.run_select(&plan)?;
            total += rows
                .first()
                .and_then(|row| row.get(crate::schema::COL_COUNT))
                .and_then(crate::value::StorageValue::as_i64)
                .unwrap_or(0);
        }
        tx.commit()?;
        Ok(total)
    }

    /// Single scalar result: the first column of the first row. The shape
    /// aggregate singletons (an account balance) come back in.
    pub fn singleton(&self, db: &Database) -> Result<Option<crate::value::StorageValue>, Error> {
        let rows = self.fetch_rows(db)?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };
        let index = row
            .columns()
            .iter()
            .position(|c| c != crate::schema::COL_KIND);
        Ok(index.and_then(|i| row.at(i).cloned()))
    }

    /// Delete every matching entity. Kinds with a delete hook go through
    /// it entity by entity (the hook may veto or cascade); others delete
    /// in one statement.
    pub fn delete(&self, db: &Database) -> Result<usize, Error> {
        let tx = db.begin()?;
        let mut deleted = 0;
        for kind in self.kind_list(db)? {
            self.reconcile_targets(db, &kind)?;
            let sealed = db.registry().seal(&kind)?;
            if sealed.on_delete.is_some() {
                let plan = self.plan_for(db, &kind, QueryMode::Columns)?;
                for row in db.run_select(&plan)? {
                    let entity = decode_entity(db, &row)?;
                    deleted += entity.delete(db)?;
                }
            } else {
                let plan = self.plan_for(db, &kind, QueryMode::Delete)?;
                deleted += db.run_write(&plan)?;
            }
        }
        tx.commit()?;
        Ok(deleted)
    }
}
