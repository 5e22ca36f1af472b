//! Struct/enum definitions, the type registry, and runtime type checks.
//!
//! Definitions are keyed by fully qualified name (`module.Name` when imported,
//! bare `Name` otherwise) and live for the whole run. Generic definitions are
//! monomorphized on first instantiation and cached by their concrete argument
//! tuple.

use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::TypeExpr;
use crate::error::{ErrorKind, NaabError};
use crate::token::SourceLoc;
use crate::value::{HeapData, Value};

#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: String,
    pub ty: TypeExpr,
}

#[derive(Debug, Clone)]
pub struct StructDef {
    /// Fully qualified: `geometry.Point` or bare `Point`.
    pub name: String,
    pub generics: Vec<String>,
    pub fields: Vec<FieldDef>,
    pub loc: SourceLoc,
}

impl StructDef {
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

#[derive(Debug, Clone)]
pub struct VariantDef {
    pub name: String,
    pub payload: Vec<TypeExpr>,
}

#[derive(Debug, Clone)]
pub struct EnumDef {
    pub name: String,
    pub generics: Vec<String>,
    pub variants: Vec<VariantDef>,
    pub loc: SourceLoc,
}

impl EnumDef {
    pub fn variant_index(&self, name: &str) -> Option<usize> {
        self.variants.iter().position(|v| v.name == name)
    }
}

/// Process-wide within one interpreter. All struct/enum lookups and
/// monomorphizations go through here.
#[derive(Default)]
pub struct TypeRegistry {
    structs: HashMap<String, Rc<StructDef>>,
    enums: HashMap<String, Rc<EnumDef>>,
    /// Cache key: base fully-qualified name plus rendered argument tuple.
    mono_structs: HashMap<(String, Vec<String>), Rc<StructDef>>,
    mono_enums: HashMap<(String, Vec<String>), Rc<EnumDef>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define_struct(&mut self, def: StructDef) -> Result<(), NaabError> {
        if self.structs.contains_key(&def.name) {
            return Err(NaabError::new(
                ErrorKind::Type,
                format!("struct '{}' is already defined", def.name),
            )
            .at(def.loc.clone()));
        }
        self.structs.insert(def.name.clone(), Rc::new(def));
        Ok(())
    }

    pub fn define_enum(&mut self, def: EnumDef) -> Result<(), NaabError> {
        if self.enums.contains_key(&def.name) {
            return Err(NaabError::new(
                ErrorKind::Type,
                format!("enum '{}' is already defined", def.name),
            )
            .at(def.loc.clone()));
        }
        self.enums.insert(def.name.clone(), Rc::new(def));
        Ok(())
    }

    pub fn get_struct(&self, name: &str) -> Option<Rc<StructDef>> {
        self.structs.get(name).cloned()
    }

    pub fn get_enum(&self, name: &str) -> Option<Rc<EnumDef>> {
        self.enums.get(name).cloned()
    }

    /// Find the enum that declares `variant`, searching bare names first.
    pub fn enum_with_variant(&self, variant: &str) -> Option<(Rc<EnumDef>, usize)> {
        for def in self.enums.values() {
            if let Some(idx) = def.variant_index(variant) {
                return Some((def.clone(), idx));
            }
        }
        None
    }

    pub fn monomorphization_count(&self) -> usize {
        self.mono_structs.len() + self.mono_enums.len()
    }

    pub fn has_struct_monomorphization(&self, base: &str, args: &[TypeExpr]) -> bool {
        let key = (base.to_string(), render_args(args));
        self.mono_structs.contains_key(&key)
    }

    /// Monomorphize a generic struct for the given concrete arguments,
    /// reusing the cached specialization when present.
    pub fn instantiate_struct(
        &mut self,
        base: &Rc<StructDef>,
        args: &[TypeExpr],
        loc: &SourceLoc,
    ) -> Result<Rc<StructDef>, NaabError> {
        if base.generics.is_empty() {
            return Ok(base.clone());
        }
        if base.generics.len() != args.len() {
            return Err(NaabError::new(
                ErrorKind::Type,
                format!(
                    "struct '{}' expects {} type arguments, got {}",
                    base.name,
                    base.generics.len(),
                    args.len()
                ),
            )
            .at(loc.clone()));
        }
        let key = (base.name.clone(), render_args(args));
        if let Some(cached) = self.mono_structs.get(&key) {
            return Ok(cached.clone());
        }

        let substitutions: HashMap<&str, &TypeExpr> = base
            .generics
            .iter()
            .map(|g| g.as_str())
            .zip(args.iter())
            .collect();
        let fields = base
            .fields
            .iter()
            .map(|f| FieldDef {
                name: f.name.clone(),
                ty: substitute(&f.ty, &substitutions),
            })
            .collect();
        let def = Rc::new(StructDef {
            name: format!("{}<{}>", base.name, key.1.join(", ")),
            generics: Vec::new(),
            fields,
            loc: base.loc.clone(),
        });
        self.mono_structs.insert(key, def.clone());
        Ok(def)
    }

    pub fn instantiate_enum(
        &mut self,
        base: &Rc<EnumDef>,
        args: &[TypeExpr],
        loc: &SourceLoc,
    ) -> Result<Rc<EnumDef>, NaabError> {
        if base.generics.is_empty() {
            return Ok(base.clone());
        }
        if base.generics.len() != args.len() {
            return Err(NaabError::new(
                ErrorKind::Type,
                format!(
                    "enum '{}' expects {} type arguments, got {}",
                    base.name,
                    base.generics.len(),
                    args.len()
                ),
            )
            .at(loc.clone()));
        }
        let key = (base.name.clone(), render_args(args));
        if let Some(cached) = self.mono_enums.get(&key) {
            return Ok(cached.clone());
        }

        let substitutions: HashMap<&str, &TypeExpr> = base
            .generics
            .iter()
            .map(|g| g.as_str())
            .zip(args.iter())
            .collect();
        let variants = base
            .variants
            .iter()
            .map(|v| VariantDef {
                name: v.name.clone(),
                payload: v.payload.iter().map(|t| substitute(t, &substitutions)).collect(),
            })
            .collect();
        let def = Rc::new(EnumDef {
            name: format!("{}<{}>", base.name, key.1.join(", ")),
            generics: Vec::new(),
            variants,
            loc: base.loc.clone(),
        });
        self.mono_enums.insert(key, def.clone());
        Ok(def)
    }

    /// Does `value` satisfy the annotation `ty`? Struct and enum matches are
    /// by definition identity, never structural.
    pub fn value_matches(&self, value: &Value, ty: &TypeExpr) -> bool {
        match ty {
            TypeExpr::Union {
                alternatives,
                nullable,
                ..
            } => {
                if *nullable && matches!(value, Value::Null) {
                    return true;
                }
                alternatives.iter().any(|alt| self.value_matches(value, alt))
            }
            TypeExpr::Named {
                module,
                name,
                params,
                nullable,
                ..
            } => {
                if name == "any" {
                    return true;
                }
                if matches!(value, Value::Null) {
                    return *nullable || name == "null";
                }
                match name.as_str() {
                    "null" => false,
                    "bool" => matches!(value, Value::Bool(_)),
                    "int" => matches!(value, Value::Int(_)),
                    "float" => matches!(value, Value::Float(_)),
                    "string" => matches!(value, Value::Str(_)),
                    "function" => matches!(value, Value::Function(_)),
                    "list" => match value {
                        Value::List(cell) => match &*cell.data.borrow() {
                            HeapData::List(items) => match params.first() {
                                Some(elem_ty) => {
                                    items.iter().all(|v| self.value_matches(v, elem_ty))
                                }
                                None => true,
                            },
                            _ => false,
                        },
                        _ => false,
                    },
                    "dict" => match value {
                        Value::Dict(cell) => match &*cell.data.borrow() {
                            HeapData::Dict(entries) => {
                                // String is the only supported key type.
                                if let Some(key_ty) = params.first() {
                                    if !matches!(
                                        key_ty,
                                        TypeExpr::Named { name, .. } if name == "string" || name == "any"
                                    ) {
                                        return false;
                                    }
                                }
                                match params.get(1) {
                                    Some(val_ty) => entries
                                        .values()
                                        .all(|v| self.value_matches(v, val_ty)),
                                    None => true,
                                }
                            }
                            _ => false,
                        },
                        _ => false,
                    },
                    _ => {
                        let qualified = match module {
                            Some(m) => format!("{}.{}", m, name),
                            None => name.clone(),
                        };
                        let wanted_name = if params.is_empty() {
                            qualified
                        } else {
                            format!("{}<{}>", qualified, render_args(params).join(", "))
                        };
                        match value {
                            Value::Struct(cell) => match &*cell.data.borrow() {
                                HeapData::Struct { def, .. } => {
                                    match self.lookup_concrete_struct(&wanted_name) {
                                        Some(expected) => Rc::ptr_eq(&expected, def),
                                        None => def.name == wanted_name,
                                    }
                                }
                                _ => false,
                            },
                            Value::Enum(cell) => match &*cell.data.borrow() {
                                HeapData::Enum { def, .. } => {
                                    match self.lookup_concrete_enum(&wanted_name) {
                                        Some(expected) => Rc::ptr_eq(&expected, def),
                                        None => def.name == wanted_name,
                                    }
                                }
                                _ => false,
                            },
                            _ => false,
                        }
                    }
                }
            }
        }
    }

    fn lookup_concrete_struct(&self, name: &str) -> Option<Rc<StructDef>> {
        if let Some(def) = self.structs.get(name) {
            return Some(def.clone());
        }
        // `Box<int>` style names live in the monomorphization cache.
        self.mono_structs
            .values()
            .find(|d| d.name == name)
            .cloned()
    }

    fn lookup_concrete_enum(&self, name: &str) -> Option<Rc<EnumDef>> {
        if let Some(def) = self.enums.get(name) {
            return Some(def.clone());
        }
        self.mono_enums.values().find(|d| d.name == name).cloned()
    }

    /// All known type names, fuel for suggestions.
    pub fn type_names(&self) -> Vec<String> {
        self.structs
            .keys()
            .chain(self.enums.keys())
            .cloned()
            .collect()
    }
}

fn render_args(args: &[TypeExpr]) -> Vec<String> {
    args.iter().map(|a| a.display_name()).collect()
}

/// Replace generic parameter names with their bound concrete types.
fn substitute(ty: &TypeExpr, bindings: &HashMap<&str, &TypeExpr>) -> TypeExpr {
    match ty {
        TypeExpr::Named {
            module: None,
            name,
            params,
            nullable,
            loc,
        } if params.is_empty() => {
            if let Some(concrete) = bindings.get(name.as_str()) {
                let mut substituted = (*concrete).clone();
                if *nullable {
                    match &mut substituted {
                        TypeExpr::Named { nullable, .. } | TypeExpr::Union { nullable, .. } => {
                            *nullable = true;
                        }
                    }
                }
                substituted
            } else {
                TypeExpr::Named {
                    module: None,
                    name: name.clone(),
                    params: Vec::new(),
                    nullable: *nullable,
                    loc: loc.clone(),
                }
            }
        }
        TypeExpr::Named {
            module,
            name,
            params,
            nullable,
            loc,
        } => TypeExpr::Named {
            module: module.clone(),
            name: name.clone(),
            params: params.iter().map(|p| substitute(p, bindings)).collect(),
            nullable: *nullable,
            loc: loc.clone(),
        },
        TypeExpr::Union {
            alternatives,
            nullable,
            loc,
        } => TypeExpr::Union {
            alternatives: alternatives
                .iter()
                .map(|a| substitute(a, bindings))
                .collect(),
            nullable: *nullable,
            loc: loc.clone(),
        },
    }
}

/// The annotation a runtime value would satisfy, used to infer generic
/// arguments from struct-literal field values.
pub fn type_of_value(value: &Value, loc: &SourceLoc) -> TypeExpr {
    let name = match value {
        Value::Null => "null".to_string(),
        Value::Bool(_) => "bool".to_string(),
        Value::Int(_) => "int".to_string(),
        Value::Float(_) => "float".to_string(),
        Value::Str(_) => "string".to_string(),
        Value::List(_) => "list".to_string(),
        Value::Dict(_) => "dict".to_string(),
        Value::Function(_) => "function".to_string(),
        other => other.type_name(),
    };
    TypeExpr::Named {
        module: None,
        name,
        params: Vec::new(),
        nullable: false,
        loc: loc.clone(),
    }
}
