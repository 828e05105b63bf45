// src/pipeline.rs
// Aggregation pipeline: stage executors and the batch runner

use crate::accumulator::{AccState, AccumulatorSpec};
use crate::document::Document;
use crate::error::{PipeError, Result};
use crate::expr::{CondOp, EvalContext, Expr, Predicate};
use crate::store::DocumentStore;
use crate::value::Value;
use crate::{log_debug, log_info};
use ahash::AHashMap;
use chrono::{DateTime, Utc};
use serde_json::Value as Json;

/// Field name carrying the group key in `$group` output
pub const ID_FIELD: &str = "_id";

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Parse a field reference ("$fieldName" -> "fieldName")
fn parse_field_reference(value: &Json, op_name: &str) -> Result<String> {
    if let Some(s) = value.as_str() {
        if let Some(path) = s.strip_prefix('$') {
            if !path.starts_with('$') {
                return Ok(path.to_string());
            }
        }
    }
    Err(PipeError::InvalidPipeline(format!(
        "{} expects a field reference starting with $",
        op_name
    )))
}

/// Parse a JSON literal into a [`Value`]
///
/// `{"$date": "..."}` becomes a timestamp; any other object becomes a
/// nested document of literals.
fn parse_literal(value: &Json) -> Result<Value> {
    match value {
        Json::String(s) => Ok(Value::String(s.clone())),
        Json::Bool(b) => Ok(Value::Bool(*b)),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Int(i))
            } else if let Some(f) = n.as_f64() {
                Ok(Value::Float(f))
            } else {
                Err(PipeError::InvalidPipeline(format!(
                    "unrepresentable number literal: {}",
                    n
                )))
            }
        }
        Json::Array(items) => Ok(Value::Array(
            items.iter().map(parse_literal).collect::<Result<_>>()?,
        )),
        Json::Object(obj) => {
            if let Some(date) = obj.get("$date") {
                let s = date.as_str().ok_or_else(|| {
                    PipeError::InvalidPipeline("$date expects an RFC 3339 string".to_string())
                })?;
                let ts = DateTime::parse_from_rfc3339(s).map_err(|e| {
                    PipeError::InvalidPipeline(format!("invalid $date '{}': {}", s, e))
                })?;
                Ok(Value::Timestamp(ts.with_timezone(&Utc)))
            } else {
                let mut doc = Document::new();
                for (k, v) in obj {
                    doc.insert(k.clone(), parse_literal(v)?);
                }
                Ok(Value::Document(doc))
            }
        }
        Json::Null => Err(PipeError::InvalidPipeline(
            "null literals are not supported; omit the field instead".to_string(),
        )),
    }
}

/// Parse an expression from its JSON description
///
/// `elem_var` is the `$map` element binding currently in scope (the "as"
/// name), if any; `$$<var>.path` references resolve against it.
fn parse_expr(value: &Json, elem_var: Option<&str>) -> Result<Expr> {
    match value {
        Json::String(s) if s.starts_with("$$") => {
            let var = elem_var.ok_or_else(|| {
                PipeError::InvalidPipeline(format!(
                    "'{}' used outside of a $map element scope",
                    s
                ))
            })?;
            let body = &s[2..];
            if body == var {
                Ok(Expr::ElemField(String::new()))
            } else if let Some(path) = body.strip_prefix(&format!("{}.", var)) {
                Ok(Expr::ElemField(path.to_string()))
            } else {
                Err(PipeError::InvalidPipeline(format!(
                    "unknown variable '{}', expected '$${}'",
                    s, var
                )))
            }
        }
        Json::String(s) if s.starts_with('$') => Ok(Expr::Field(s[1..].to_string())),
        Json::Object(obj) if obj.len() == 1 && obj.contains_key("$multiply") => {
            let operands = obj["$multiply"].as_array().ok_or_else(|| {
                PipeError::InvalidPipeline("$multiply expects an array of two operands".to_string())
            })?;
            if operands.len() != 2 {
                return Err(PipeError::InvalidPipeline(
                    "$multiply expects exactly two operands".to_string(),
                ));
            }
            Ok(Expr::Multiply(
                Box::new(parse_expr(&operands[0], elem_var)?),
                Box::new(parse_expr(&operands[1], elem_var)?),
            ))
        }
        Json::Object(obj) if obj.len() == 1 && obj.contains_key("$daysFromNow") => {
            let days = obj["$daysFromNow"].as_i64().ok_or_else(|| {
                PipeError::InvalidPipeline("$daysFromNow expects an integer day count".to_string())
            })?;
            Ok(Expr::DaysFromNow(days))
        }
        Json::Object(obj) if obj.contains_key("$date") => {
            Ok(Expr::Literal(parse_literal(value)?))
        }
        Json::Object(obj) => {
            // Document constructor: {"status": "$status", "count": 1}.
            // A $-prefixed key here is a misspelled or unsupported
            // operator, not a field name; accepting it would push the
            // operator object through as a literal.
            let mut fields = Vec::with_capacity(obj.len());
            for (name, sub) in obj {
                if name.starts_with('$') {
                    return Err(PipeError::InvalidPipeline(format!(
                        "unknown expression operator: {}",
                        name
                    )));
                }
                fields.push((name.clone(), parse_expr(sub, elem_var)?));
            }
            Ok(Expr::Doc(fields))
        }
        _ => Ok(Expr::Literal(parse_literal(value)?)),
    }
}

// ============================================================================
// PIPELINE
// ============================================================================

/// An immutable sequence of stages, executed in declared order with
/// batch semantics: stage i's full output is stage i+1's full input.
#[derive(Debug, Clone)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

/// Pipeline stage
#[derive(Debug, Clone)]
pub enum Stage {
    Match(MatchStage),
    Lookup(LookupStage),
    Unwind(UnwindStage),
    Group(GroupStage),
    Project(ProjectStage),
}

impl Pipeline {
    pub fn new(stages: Vec<Stage>) -> Self {
        Pipeline { stages }
    }

    /// Parse a pipeline from a JSON array of stage descriptions.
    ///
    /// Unknown stage kinds fail here, before any document is processed.
    pub fn from_json(pipeline_json: &Json) -> Result<Self> {
        let Json::Array(stages_array) = pipeline_json else {
            return Err(PipeError::InvalidPipeline(
                "pipeline description must be an array".to_string(),
            ));
        };
        if stages_array.is_empty() {
            return Err(PipeError::InvalidPipeline(
                "pipeline cannot be empty".to_string(),
            ));
        }
        let stages = stages_array
            .iter()
            .map(Stage::from_json)
            .collect::<Result<Vec<_>>>()?;
        Ok(Pipeline { stages })
    }

    /// Parse a pipeline from JSON text.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let parsed: Json = serde_json::from_str(text)?;
        Self::from_json(&parsed)
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Run against the named source collection using the wall clock.
    pub fn run(&self, store: &DocumentStore, source: &str) -> Result<Vec<Document>> {
        self.run_at(store, source, Utc::now())
    }

    /// Run with an injected clock.
    ///
    /// `now` is fixed here for the entire run; every relative-date
    /// comparison in every stage sees the same instant. Fails fast: the
    /// first stage error aborts the run with no partial result.
    pub fn run_at(
        &self,
        store: &DocumentStore,
        source: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Document>> {
        let ctx = EvalContext::new(now);
        let mut docs: Vec<Document> = store
            .collection(source)
            .ok_or_else(|| PipeError::CollectionNotFound(source.to_string()))?
            .to_vec();
        log_debug!("run start: {} documents from '{}'", docs.len(), source);

        for (index, stage) in self.stages.iter().enumerate() {
            docs = stage
                .execute(docs, store, &ctx)
                .map_err(|e| PipeError::StageFailed {
                    index,
                    kind: stage.kind(),
                    source: Box::new(e),
                })?;
            log_debug!("stage {} (${}) emitted {} documents", index, stage.kind(), docs.len());
        }

        log_info!("run complete: {} result documents", docs.len());
        Ok(docs)
    }
}

impl Stage {
    /// Parse a single stage description (an object with exactly one key)
    pub fn from_json(stage_json: &Json) -> Result<Self> {
        let Json::Object(obj) = stage_json else {
            return Err(PipeError::InvalidPipeline(
                "stage description must be an object".to_string(),
            ));
        };
        if obj.len() != 1 {
            return Err(PipeError::InvalidPipeline(
                "each stage must have exactly one operator".to_string(),
            ));
        }
        let (stage_name, stage_spec) = obj.iter().next().unwrap();
        match stage_name.as_str() {
            "$match" => Ok(Stage::Match(MatchStage::from_json(stage_spec)?)),
            "$lookup" => Ok(Stage::Lookup(LookupStage::from_json(stage_spec)?)),
            "$unwind" => Ok(Stage::Unwind(UnwindStage::from_json(stage_spec)?)),
            "$group" => Ok(Stage::Group(GroupStage::from_json(stage_spec)?)),
            "$project" => Ok(Stage::Project(ProjectStage::from_json(stage_spec)?)),
            other => Err(PipeError::UnknownStage(other.to_string())),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Stage::Match(_) => "match",
            Stage::Lookup(_) => "lookup",
            Stage::Unwind(_) => "unwind",
            Stage::Group(_) => "group",
            Stage::Project(_) => "project",
        }
    }

    fn execute(
        &self,
        docs: Vec<Document>,
        store: &DocumentStore,
        ctx: &EvalContext,
    ) -> Result<Vec<Document>> {
        match self {
            Stage::Match(stage) => stage.execute(docs, ctx),
            Stage::Lookup(stage) => stage.execute(docs, store),
            Stage::Unwind(stage) => stage.execute(docs),
            Stage::Group(stage) => stage.execute(docs, ctx),
            Stage::Project(stage) => stage.execute(docs, ctx),
        }
    }
}

// ============================================================================
// $match
// ============================================================================

/// Pure order-preserving filter over a conjunctive predicate
#[derive(Debug, Clone)]
pub struct MatchStage {
    predicate: Predicate,
}

impl MatchStage {
    pub fn new(predicate: Predicate) -> Self {
        MatchStage { predicate }
    }

    pub fn from_json(spec: &Json) -> Result<Self> {
        let Json::Object(obj) = spec else {
            return Err(PipeError::InvalidPipeline(
                "$match expects an object of field conditions".to_string(),
            ));
        };
        let mut predicate = Predicate::default();
        for (path, cond_spec) in obj {
            match cond_spec {
                Json::Object(ops) if ops.keys().any(|k| k.starts_with('$')) => {
                    for (op, operand) in ops {
                        let cond = match op.as_str() {
                            "$in" => {
                                let items = operand.as_array().ok_or_else(|| {
                                    PipeError::InvalidPipeline(
                                        "$in expects an array of literals".to_string(),
                                    )
                                })?;
                                CondOp::In(
                                    items.iter().map(parse_literal).collect::<Result<_>>()?,
                                )
                            }
                            "$gt" => CondOp::Gt(parse_expr(operand, None)?),
                            "$gte" => CondOp::Gte(parse_expr(operand, None)?),
                            "$lt" => CondOp::Lt(parse_expr(operand, None)?),
                            "$lte" => CondOp::Lte(parse_expr(operand, None)?),
                            "$eq" => CondOp::Eq(parse_literal(operand)?),
                            other => {
                                return Err(PipeError::InvalidPipeline(format!(
                                    "unknown match operator: {}",
                                    other
                                )))
                            }
                        };
                        predicate = predicate.and(path.clone(), cond);
                    }
                }
                literal => {
                    predicate = predicate.and(path.clone(), CondOp::Eq(parse_literal(literal)?));
                }
            }
        }
        Ok(MatchStage { predicate })
    }

    fn execute(&self, docs: Vec<Document>, ctx: &EvalContext) -> Result<Vec<Document>> {
        let mut results = Vec::new();
        for doc in docs {
            if self.predicate.matches(&doc, ctx)? {
                results.push(doc);
            }
        }
        Ok(results)
    }
}

// ============================================================================
// $lookup
// ============================================================================

/// Left-outer join with multiplicity: every input document gains
/// `as_field` holding ALL foreign documents whose `foreign_field` equals
/// its `local_field` (empty array for zero matches).
#[derive(Debug, Clone)]
pub struct LookupStage {
    from: String,
    local_field: String,
    foreign_field: String,
    as_field: String,
}

impl LookupStage {
    pub fn new(
        from: impl Into<String>,
        local_field: impl Into<String>,
        foreign_field: impl Into<String>,
        as_field: impl Into<String>,
    ) -> Self {
        LookupStage {
            from: from.into(),
            local_field: local_field.into(),
            foreign_field: foreign_field.into(),
            as_field: as_field.into(),
        }
    }

    pub fn from_json(spec: &Json) -> Result<Self> {
        let Json::Object(obj) = spec else {
            return Err(PipeError::InvalidPipeline(
                "$lookup expects an object".to_string(),
            ));
        };
        let field = |name: &str| -> Result<String> {
            obj.get(name)
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .ok_or_else(|| {
                    PipeError::InvalidPipeline(format!("$lookup requires string field '{}'", name))
                })
        };
        Ok(LookupStage {
            from: field("from")?,
            local_field: field("localField")?,
            foreign_field: field("foreignField")?,
            as_field: field("as")?,
        })
    }

    fn execute(&self, docs: Vec<Document>, store: &DocumentStore) -> Result<Vec<Document>> {
        let foreign = store
            .collection(&self.from)
            .ok_or_else(|| PipeError::CollectionNotFound(self.from.clone()))?;

        // One index build per invocation: O(|input| + |foreign|) overall
        // instead of a nested scan. Keys are canonical strings so that
        // Int(5) and Float(5.0) land in the same bucket.
        let mut index: AHashMap<String, Vec<usize>> = AHashMap::new();
        for (i, fdoc) in foreign.iter().enumerate() {
            if let Some(key) = fdoc.get(&self.foreign_field) {
                index.entry(key.canonical_string()).or_default().push(i);
            }
        }

        let mut results = Vec::with_capacity(docs.len());
        for mut doc in docs {
            let matched: Vec<Value> = doc
                .get(&self.local_field)
                .and_then(|key| index.get(&key.canonical_string()))
                .map(|hits| {
                    hits.iter()
                        .map(|&i| Value::Document(foreign[i].clone()))
                        .collect()
                })
                .unwrap_or_default();
            doc.insert(self.as_field.clone(), Value::Array(matched));
            results.push(doc);
        }
        Ok(results)
    }
}

// ============================================================================
// $unwind
// ============================================================================

/// Flatten one document-with-array into one document per element, the
/// array field replaced by the single element.
///
/// A document whose array is empty or absent produces ZERO output
/// documents - unwind silently drops such inputs.
#[derive(Debug, Clone)]
pub struct UnwindStage {
    path: String,
}

impl UnwindStage {
    pub fn new(path: impl Into<String>) -> Self {
        UnwindStage { path: path.into() }
    }

    pub fn from_json(spec: &Json) -> Result<Self> {
        let path = parse_field_reference(spec, "$unwind")?;
        Ok(UnwindStage { path })
    }

    fn execute(&self, docs: Vec<Document>) -> Result<Vec<Document>> {
        let mut results = Vec::new();
        for doc in docs {
            match doc.get(&self.path) {
                None => {} // absent array: dropped
                Some(Value::Array(elements)) => {
                    for element in elements.clone() {
                        let mut out = doc.clone();
                        out.set_path(&self.path, element);
                        results.push(out);
                    }
                }
                Some(other) => {
                    return Err(PipeError::TypeMismatch {
                        expected: "array",
                        found: other.type_name(),
                        context: format!("$unwind on '{}'", self.path),
                    })
                }
            }
        }
        Ok(results)
    }
}

// ============================================================================
// $group
// ============================================================================

/// Group documents by the distinct value of an expression and fold each
/// group through the configured accumulators.
///
/// Groups are emitted in first-seen key order, not sorted.
#[derive(Debug, Clone)]
pub struct GroupStage {
    id: Expr,
    accumulators: Vec<(String, AccumulatorSpec)>,
}

struct GroupEntry {
    key: Option<Value>,
    states: Vec<AccState>,
}

impl GroupStage {
    pub fn new(id: Expr, accumulators: Vec<(String, AccumulatorSpec)>) -> Self {
        GroupStage { id, accumulators }
    }

    pub fn from_json(spec: &Json) -> Result<Self> {
        let Json::Object(obj) = spec else {
            return Err(PipeError::InvalidPipeline(
                "$group expects an object".to_string(),
            ));
        };
        let id_spec = obj.get(ID_FIELD).ok_or_else(|| {
            PipeError::InvalidPipeline("$group requires an _id expression".to_string())
        })?;
        let id = parse_expr(id_spec, None)?;

        let mut accumulators = Vec::new();
        for (name, acc_spec) in obj {
            if name == ID_FIELD {
                continue;
            }
            accumulators.push((name.clone(), parse_accumulator(acc_spec)?));
        }
        Ok(GroupStage { id, accumulators })
    }

    fn execute(&self, docs: Vec<Document>, ctx: &EvalContext) -> Result<Vec<Document>> {
        // Insertion-ordered group table: hash buckets for key collision,
        // a side vector for first-seen emission order.
        let mut buckets: AHashMap<String, usize> = AHashMap::new();
        let mut entries: Vec<GroupEntry> = Vec::new();

        for doc in &docs {
            let key = self.id.eval(doc, ctx)?;
            let key_str = key
                .as_ref()
                .map(|v| v.canonical_string())
                .unwrap_or_else(|| "<absent>".to_string());

            let slot = *buckets.entry(key_str).or_insert_with(|| {
                entries.push(GroupEntry {
                    key,
                    states: self.accumulators.iter().map(|(_, a)| a.init()).collect(),
                });
                entries.len() - 1
            });

            let entry = &mut entries[slot];
            for ((_, spec), state) in self.accumulators.iter().zip(entry.states.iter_mut()) {
                spec.update(state, doc, ctx)?;
            }
        }

        let mut results = Vec::with_capacity(entries.len());
        for entry in entries {
            let mut out = Document::new();
            if let Some(key) = entry.key {
                out.insert(ID_FIELD, key);
            }
            for ((name, spec), state) in self.accumulators.iter().zip(entry.states) {
                if let Some(value) = spec.finalize(state) {
                    out.insert(name.clone(), value);
                }
            }
            results.push(out);
        }
        Ok(results)
    }
}

fn parse_accumulator(spec: &Json) -> Result<AccumulatorSpec> {
    let Json::Object(obj) = spec else {
        return Err(PipeError::InvalidPipeline(
            "accumulator must be an object".to_string(),
        ));
    };
    if obj.len() != 1 {
        return Err(PipeError::InvalidPipeline(
            "accumulator must have exactly one operator".to_string(),
        ));
    }
    let (op, operand) = obj.iter().next().unwrap();
    match op.as_str() {
        "$count" => Ok(AccumulatorSpec::Count),
        "$sum" => Ok(AccumulatorSpec::Sum(parse_expr(operand, None)?)),
        "$avg" => Ok(AccumulatorSpec::Avg(parse_expr(operand, None)?)),
        "$push" => Ok(AccumulatorSpec::Push(parse_expr(operand, None)?)),
        other => Err(PipeError::InvalidPipeline(format!(
            "unknown accumulator: {}",
            other
        ))),
    }
}

// ============================================================================
// $project
// ============================================================================

/// Per-output-field projection action
#[derive(Debug, Clone)]
pub enum ProjectField {
    /// `"field": 0` - drop (only meaningful for `_id`, everything not
    /// mentioned is dropped anyway)
    Suppress,
    /// `"field": 1` - copy the field verbatim
    Include,
    /// `"name": "$source.path"` - assign another field's value
    Rename(String),
    /// Computed expression
    Computed(Expr),
    /// `$map`: evaluate `expr` once per element of the input array with
    /// the element bound as the current element; output order follows
    /// input order
    MapArray { input: String, expr: Expr },
}

/// Reshape documents with allow-list semantics: fields not mentioned in
/// the projection are dropped.
#[derive(Debug, Clone)]
pub struct ProjectStage {
    fields: Vec<(String, ProjectField)>,
}

impl ProjectStage {
    pub fn new(fields: Vec<(String, ProjectField)>) -> Self {
        ProjectStage { fields }
    }

    pub fn from_json(spec: &Json) -> Result<Self> {
        let Json::Object(obj) = spec else {
            return Err(PipeError::InvalidPipeline(
                "$project expects an object".to_string(),
            ));
        };
        let mut fields = Vec::with_capacity(obj.len());
        for (name, field_spec) in obj {
            let action = match field_spec {
                Json::Number(n) => match n.as_i64() {
                    Some(1) => ProjectField::Include,
                    Some(0) => ProjectField::Suppress,
                    _ => {
                        return Err(PipeError::InvalidPipeline(format!(
                            "invalid projection value for '{}': {}",
                            name, n
                        )))
                    }
                },
                Json::String(s) if s.starts_with('$') => {
                    ProjectField::Rename(s[1..].to_string())
                }
                Json::Object(map) if map.len() == 1 && map.contains_key("$map") => {
                    parse_map_projection(&map["$map"])?
                }
                Json::Object(_) => ProjectField::Computed(parse_expr(field_spec, None)?),
                _ => {
                    return Err(PipeError::InvalidPipeline(format!(
                        "projection for '{}' must be 0, 1, a field reference or an expression",
                        name
                    )))
                }
            };
            fields.push((name.clone(), action));
        }
        Ok(ProjectStage { fields })
    }

    fn execute(&self, docs: Vec<Document>, ctx: &EvalContext) -> Result<Vec<Document>> {
        let mut results = Vec::with_capacity(docs.len());
        for doc in docs {
            results.push(self.project_document(&doc, ctx)?);
        }
        Ok(results)
    }

    fn project_document(&self, doc: &Document, ctx: &EvalContext) -> Result<Document> {
        let mut out = Document::new();
        for (name, action) in &self.fields {
            match action {
                ProjectField::Suppress => {}
                ProjectField::Include => {
                    if let Some(value) = doc.get(name) {
                        out.insert(name.clone(), value.clone());
                    }
                }
                ProjectField::Rename(source) => {
                    if let Some(value) = doc.get(source) {
                        out.insert(name.clone(), value.clone());
                    }
                }
                ProjectField::Computed(expr) => {
                    if let Some(value) = expr.eval(doc, ctx)? {
                        out.insert(name.clone(), value);
                    }
                }
                ProjectField::MapArray { input, expr } => match doc.get(input) {
                    None => {} // absent input array: field omitted
                    Some(Value::Array(elements)) => {
                        let mut mapped = Vec::with_capacity(elements.len());
                        for element in elements {
                            let elem_ctx = ctx.with_elem(element);
                            if let Some(value) = expr.eval(doc, &elem_ctx)? {
                                mapped.push(value);
                            }
                        }
                        out.insert(name.clone(), Value::Array(mapped));
                    }
                    Some(other) => {
                        return Err(PipeError::TypeMismatch {
                            expected: "array",
                            found: other.type_name(),
                            context: format!("$map over '{}'", input),
                        })
                    }
                },
            }
        }
        Ok(out)
    }
}

fn parse_map_projection(spec: &Json) -> Result<ProjectField> {
    let Json::Object(obj) = spec else {
        return Err(PipeError::InvalidPipeline(
            "$map expects an object".to_string(),
        ));
    };
    let input = parse_field_reference(
        obj.get("input").ok_or_else(|| {
            PipeError::InvalidPipeline("$map requires 'input'".to_string())
        })?,
        "$map input",
    )?;
    let elem_var = obj
        .get("as")
        .and_then(|v| v.as_str())
        .ok_or_else(|| PipeError::InvalidPipeline("$map requires a string 'as'".to_string()))?;
    let body = obj
        .get("in")
        .ok_or_else(|| PipeError::InvalidPipeline("$map requires 'in'".to_string()))?;
    let expr = parse_expr(body, Some(elem_var))?;
    Ok(ProjectField::MapArray { input, expr })
}

// ============================================================================
// TESTS
// ============================================================================
