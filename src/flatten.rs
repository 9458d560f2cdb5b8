use crate::config::{ArrayMode, NullPolicy, ProcessingConfig};
use crate::context::ProcessingContext;
use crate::error::{Error, Result};
use crate::identity::{IdGenerator, RecordLocation};
use crate::naming::{self, AbbreviationCache};
use crate::types::{FlatRecord, TableSet};
use serde_json::{Map, Value};
use tracing::{debug, trace};

/// Field name given to scalar and array elements extracted into a child table
pub const VALUE_FIELD: &str = "value";

/// Appended to a user field whose name is taken by a metadata field
pub const SHADOWED_SUFFIX: &str = "original";

/// An array field waiting to be extracted once its parent record is stored
struct PendingArray<'a> {
    table: String,
    items: &'a [Value],
    context: ProcessingContext,
}

/// The core flattener that turns nested documents into relational tables
#[derive(Debug, Clone)]
pub struct Flattener {
    config: ProcessingConfig,
    ids: IdGenerator,
}

impl Flattener {
    /// Build a flattener, rejecting invalid configuration up front
    pub fn new(config: ProcessingConfig) -> Result<Self> {
        let config = config.validate()?;
        let ids = IdGenerator::new(config.identity_mode);
        Ok(Flattener { config, ids })
    }

    pub fn config(&self) -> &ProcessingConfig {
        &self.config
    }

    /// Flatten one document into a main table and its child tables.
    ///
    /// `document` must be an object or an array of objects. Array elements
    /// become consecutive main records starting at `context.record_index`.
    pub fn flatten(
        &self,
        document: &Value,
        entity_name: &str,
        context: &ProcessingContext,
    ) -> Result<TableSet> {
        let mut tables = TableSet::new(entity_name);

        match document {
            Value::Object(obj) => {
                self.flatten_main(obj, entity_name, context, &mut tables)?;
            }
            Value::Array(items) => {
                if let Some(bad) = items.iter().position(|item| !item.is_object()) {
                    return Err(Error::validation(
                        "",
                        format!(
                            "top-level array element {bad} is {}, expected an object",
                            value_kind(&items[bad])
                        ),
                    ));
                }
                for (offset, item) in items.iter().enumerate() {
                    let Value::Object(obj) = item else { continue };
                    let ctx = context.at_record(context.record_index + offset);
                    self.flatten_main(obj, entity_name, &ctx, &mut tables)?;
                }
            }
            other => {
                return Err(Error::validation(
                    "",
                    format!(
                        "top-level value is {}, expected an object or an array of objects",
                        value_kind(other)
                    ),
                ));
            }
        }

        Ok(tables)
    }

    fn flatten_main(
        &self,
        obj: &Map<String, Value>,
        entity_name: &str,
        context: &ProcessingContext,
        tables: &mut TableSet,
    ) -> Result<()> {
        let id = self.ids.generate(&RecordLocation {
            table: entity_name,
            path: context.full_path(),
            parent_id: None,
            position: context.record_index,
        });
        self.flatten_record(obj, entity_name, true, id, None, context, tables)
    }

    /// Flatten one object into one record of `table`, then extract its arrays.
    ///
    /// The record is stored before any of its child rows, so every child
    /// table only references parents that already exist.
    #[allow(clippy::too_many_arguments)]
    fn flatten_record(
        &self,
        obj: &Map<String, Value>,
        table: &str,
        is_main: bool,
        id: String,
        parent_id: Option<&str>,
        context: &ProcessingContext,
        tables: &mut TableSet,
    ) -> Result<()> {
        let mut record = FlatRecord::new();
        let mut pending = Vec::new();
        self.collect_fields(
            obj,
            table,
            context,
            &mut record,
            &mut pending,
            &mut tables.abbreviations,
        )?;
        self.move_shadowed_fields(&mut record);

        record.insert(self.config.id_field.clone(), Value::String(id.clone()));
        if let Some(parent) = parent_id {
            record.insert(self.config.parent_field.clone(), Value::String(parent.to_string()));
        }
        record.insert(
            self.config.time_field.clone(),
            Value::String(context.run_timestamp.clone()),
        );

        if is_main {
            tables.main.push(record);
        } else {
            tables.child_mut(table).push(record);
        }

        for array in pending {
            self.extract_child_table(array, &id, tables)?;
        }

        Ok(())
    }

    /// Walk an object's fields into `record`. Nested objects land in the same
    /// record; arrays are resolved per array mode.
    fn collect_fields<'a>(
        &self,
        obj: &'a Map<String, Value>,
        table: &str,
        context: &ProcessingContext,
        record: &mut FlatRecord,
        pending: &mut Vec<PendingArray<'a>>,
        abbreviations: &mut AbbreviationCache,
    ) -> Result<()> {
        let naming = &self.config.naming;

        for (key, value) in obj {
            let field_ctx = context.descend(key, naming);
            self.check_depth(&field_ctx)?;

            match value {
                Value::Object(nested) => {
                    self.collect_fields(nested, table, &field_ctx, record, pending, abbreviations)?;
                }
                Value::Array(items) => {
                    self.collect_array(items, table, field_ctx, record, pending, abbreviations);
                }
                scalar => {
                    if let Some(value) = self.scalar_value(scalar) {
                        self.insert_field(&field_ctx, value, record, abbreviations);
                    }
                }
            }
        }

        Ok(())
    }

    fn collect_array<'a>(
        &self,
        items: &'a [Value],
        table: &str,
        field_ctx: ProcessingContext,
        record: &mut FlatRecord,
        pending: &mut Vec<PendingArray<'a>>,
        abbreviations: &mut AbbreviationCache,
    ) {
        if items.is_empty() {
            return;
        }
        let naming = &self.config.naming;

        match self.config.array_mode {
            ArrayMode::Skip => {}
            ArrayMode::Inline => {
                let text = Value::String(Value::Array(items.to_vec()).to_string());
                self.insert_field(&field_ctx, text, record, abbreviations);
            }
            ArrayMode::Smart if is_scalar_array(items) => {
                self.insert_field(&field_ctx, Value::Array(items.to_vec()), record, abbreviations);
            }
            ArrayMode::Smart | ArrayMode::Separate => {
                let base = naming::table_name(table, &field_ctx.path_components, &naming.separator);
                let child_table = naming::disambiguate(&base, &naming.separator, |name| {
                    pending.iter().any(|array| array.table == name)
                });
                pending.push(PendingArray {
                    table: child_table,
                    items,
                    context: field_ctx,
                });
            }
        }
    }

    /// Turn each array element into one record of a child table
    fn extract_child_table(
        &self,
        array: PendingArray<'_>,
        parent_id: &str,
        tables: &mut TableSet,
    ) -> Result<()> {
        trace!(table = %array.table, rows = array.items.len(), "extracting child table");
        let child_ctx = array.context.child_record();

        for (position, item) in array.items.iter().enumerate() {
            if item.is_null() && self.config.null_policy == NullPolicy::Skip {
                continue;
            }

            let id = self.ids.generate(&RecordLocation {
                table: &array.table,
                path: array.context.full_path(),
                parent_id: Some(parent_id),
                position,
            });

            match item {
                Value::Object(obj) => {
                    self.flatten_record(obj, &array.table, false, id, Some(parent_id), &child_ctx, tables)?;
                }
                element => {
                    let mut wrapped = Map::new();
                    wrapped.insert(VALUE_FIELD.to_string(), element.clone());
                    self.flatten_record(
                        &wrapped,
                        &array.table,
                        false,
                        id,
                        Some(parent_id),
                        &child_ctx,
                        tables,
                    )?;
                }
            }
        }

        Ok(())
    }

    /// Store `value` under the context's name, or under a numbered variant
    /// when another key of the record already produced that name.
    fn insert_field(
        &self,
        context: &ProcessingContext,
        value: Value,
        record: &mut FlatRecord,
        abbreviations: &mut AbbreviationCache,
    ) {
        let naming = &self.config.naming;
        let name = naming::disambiguate(&context.path(naming), &naming.separator, |name| {
            record.contains_key(name)
        });
        context.note_abbreviation(&name, abbreviations);
        record.insert(name, value);
    }

    /// Rename user fields that use a metadata field name, so the metadata
    /// can be written without losing them.
    fn move_shadowed_fields(&self, record: &mut FlatRecord) {
        let config = &self.config;
        let separator = &config.naming.separator;
        let reserved = [&config.id_field, &config.parent_field, &config.time_field];

        for field in reserved {
            let Some(value) = record.remove(field.as_str()) else {
                continue;
            };
            let base = format!("{field}{separator}{SHADOWED_SUFFIX}");
            let name = naming::disambiguate(&base, separator, |name| {
                record.contains_key(name) || reserved.iter().any(|r| r.as_str() == name)
            });
            debug!(field = %field, renamed = %name, "user field shadowed by metadata");
            record.insert(name, value);
        }
    }

    /// Apply the null, empty-string and casting policies to a scalar
    fn scalar_value(&self, value: &Value) -> Option<Value> {
        match value {
            Value::Null => match self.config.null_policy {
                NullPolicy::Skip => None,
                NullPolicy::Empty => Some(Value::String(String::new())),
                NullPolicy::Null => Some(Value::Null),
            },
            Value::String(s) if s.is_empty() && !self.config.include_empty => None,
            Value::Bool(b) if self.config.cast_to_string => Some(Value::String(b.to_string())),
            Value::Number(n) if self.config.cast_to_string => Some(Value::String(n.to_string())),
            other => Some(other.clone()),
        }
    }

    fn check_depth(&self, context: &ProcessingContext) -> Result<()> {
        if context.nesting_level() > self.config.max_depth {
            return Err(Error::validation(
                naming::join(context.full_path(), &self.config.naming.separator),
                format!("nesting exceeds max depth {}", self.config.max_depth),
            ));
        }
        Ok(())
    }
}

fn is_scalar_array(items: &[Value]) -> bool {
    items.iter().all(|v| !v.is_object() && !v.is_array())
}

pub(crate) fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
