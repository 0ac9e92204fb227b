use super::{
    ClassAccessFlags, Error, FieldAccessFlags, FieldType, MethodAccessFlags, MethodDescriptor,
    ParseDescriptor,
};
use std::collections::HashMap;

/// Loadable constant, as referenced by `ldc`, `ldc_w`, and `ldc2_w`
#[derive(Clone, Debug, PartialEq)]
pub enum ConstantData {
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    String(String),

    /// Class literal (eg. `Foo.class`), by binary name
    Class(String),
}

/// Symbolic field reference
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldRef {
    pub class: String,
    pub name: String,
    pub descriptor: FieldType,
}

impl FieldRef {
    pub fn new(class: &str, name: &str, descriptor: &str) -> Result<FieldRef, Error> {
        Ok(FieldRef {
            class: class.to_owned(),
            name: name.to_owned(),
            descriptor: FieldType::parse(descriptor)
                .map_err(|_| Error::BadDescriptor(descriptor.to_owned()))?,
        })
    }
}

/// Symbolic method reference (also used for interface methods)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodRef {
    pub class: String,
    pub name: String,
    pub descriptor: MethodDescriptor,
}

impl MethodRef {
    pub fn new(class: &str, name: &str, descriptor: &str) -> Result<MethodRef, Error> {
        Ok(MethodRef {
            class: class.to_owned(),
            name: name.to_owned(),
            descriptor: MethodDescriptor::parse(descriptor)
                .map_err(|_| Error::BadDescriptor(descriptor.to_owned()))?,
        })
    }
}

/// Call site of an `invokedynamic`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvokeDynamicRef {
    pub name: String,
    pub descriptor: MethodDescriptor,
}

/// Outcome of resolving a symbolic reference
///
/// An unresolved reference is not an error: code using it deoptimizes when reached.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution<T> {
    Resolved(T),
    Unresolved,
}

impl<T> Resolution<T> {
    pub fn resolved(self) -> Option<T> {
        match self {
            Resolution::Resolved(t) => Some(t),
            Resolution::Unresolved => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedField {
    pub access_flags: FieldAccessFlags,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedMethod {
    /// Class actually declaring the method (may be a superclass of the referenced class)
    pub holder: String,
    pub name: String,
    pub descriptor: MethodDescriptor,
    pub access_flags: MethodAccessFlags,
    pub holder_flags: ClassAccessFlags,
}

impl ResolvedMethod {
    /// Method name qualified with its holder and descriptor (eg. `java/lang/Object.hashCode()I`)
    pub fn qualified_name(&self) -> String {
        use super::RenderDescriptor;
        format!("{}.{}{}", self.holder, self.name, self.descriptor.render())
    }

    /// Can a call to this method be bound statically no matter what the receiver is?
    pub fn is_statically_bound(&self) -> bool {
        !self.access_flags.is_overridable() || self.holder_flags.contains(ClassAccessFlags::FINAL)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedType {
    pub name: String,
    pub access_flags: ClassAccessFlags,
}

impl ResolvedType {
    /// Can there be no instances of a proper subtype?
    pub fn is_leaf(&self) -> bool {
        self.access_flags.contains(ClassAccessFlags::FINAL)
    }
}

/// Constant pool and resolution services for the class declaring the method being built
///
/// Only shared references are taken, so one pool can serve concurrent compilations. Answers must
/// be deterministic within one compilation.
pub trait ConstantPool {
    /// Loadable constant at an index
    fn constant(&self, index: u16) -> Option<ConstantData>;

    /// Symbolic field reference at an index
    fn field(&self, index: u16) -> Option<FieldRef>;

    /// Symbolic method reference at an index
    fn method(&self, index: u16) -> Option<MethodRef>;

    /// Binary name of the class constant at an index
    fn class(&self, index: u16) -> Option<String>;

    /// Call site of the `invokedynamic` constant at an index
    fn invoke_dynamic(&self, _index: u16) -> Option<InvokeDynamicRef> {
        None
    }

    fn resolve_field(&self, index: u16) -> Resolution<ResolvedField>;

    fn resolve_method(&self, index: u16) -> Resolution<ResolvedMethod>;

    fn resolve_type(&self, index: u16) -> Resolution<ResolvedType>;

    /// Find the implementation a receiver of exactly `exact_type` would dispatch to
    fn resolve_method_in(&self, exact_type: &str, index: u16) -> Option<ResolvedMethod>;
}

/// In-memory constant pool
///
/// Entries which are registered without a resolution are reported as unresolved.
#[derive(Default, Debug)]
pub struct SimpleConstantPool {
    constants: HashMap<u16, ConstantData>,
    fields: HashMap<u16, (FieldRef, Option<ResolvedField>)>,
    methods: HashMap<u16, (MethodRef, Option<ResolvedMethod>)>,
    classes: HashMap<u16, (String, Option<ResolvedType>)>,
    invoke_dynamics: HashMap<u16, InvokeDynamicRef>,
    implementations: HashMap<(String, u16), ResolvedMethod>,
}

impl SimpleConstantPool {
    pub fn new() -> SimpleConstantPool {
        SimpleConstantPool::default()
    }

    pub fn add_constant(&mut self, index: u16, constant: ConstantData) {
        self.constants.insert(index, constant);
    }

    pub fn add_field(&mut self, index: u16, field: FieldRef, resolved: Option<ResolvedField>) {
        self.fields.insert(index, (field, resolved));
    }

    pub fn add_method(&mut self, index: u16, method: MethodRef, resolved: Option<ResolvedMethod>) {
        self.methods.insert(index, (method, resolved));
    }

    pub fn add_class(&mut self, index: u16, name: &str, resolved: Option<ClassAccessFlags>) {
        let resolved = resolved.map(|access_flags| ResolvedType {
            name: name.to_owned(),
            access_flags,
        });
        self.classes.insert(index, (name.to_owned(), resolved));
    }

    pub fn add_invoke_dynamic(&mut self, index: u16, call_site: InvokeDynamicRef) {
        self.invoke_dynamics.insert(index, call_site);
    }

    /// Register the method a receiver of exactly `exact_type` dispatches to for a method constant
    pub fn add_implementation(&mut self, exact_type: &str, index: u16, target: ResolvedMethod) {
        self.implementations
            .insert((exact_type.to_owned(), index), target);
    }
}

impl ConstantPool for SimpleConstantPool {
    fn constant(&self, index: u16) -> Option<ConstantData> {
        self.constants.get(&index).cloned()
    }

    fn field(&self, index: u16) -> Option<FieldRef> {
        self.fields.get(&index).map(|(field, _)| field.clone())
    }

    fn method(&self, index: u16) -> Option<MethodRef> {
        self.methods.get(&index).map(|(method, _)| method.clone())
    }

    fn class(&self, index: u16) -> Option<String> {
        self.classes.get(&index).map(|(name, _)| name.clone())
    }

    fn invoke_dynamic(&self, index: u16) -> Option<InvokeDynamicRef> {
        self.invoke_dynamics.get(&index).cloned()
    }

    fn resolve_field(&self, index: u16) -> Resolution<ResolvedField> {
        match self.fields.get(&index) {
            Some((_, Some(resolved))) => Resolution::Resolved(resolved.clone()),
            _ => Resolution::Unresolved,
        }
    }

    fn resolve_method(&self, index: u16) -> Resolution<ResolvedMethod> {
        match self.methods.get(&index) {
            Some((_, Some(resolved))) => Resolution::Resolved(resolved.clone()),
            _ => Resolution::Unresolved,
        }
    }

    fn resolve_type(&self, index: u16) -> Resolution<ResolvedType> {
        match self.classes.get(&index) {
            Some((_, Some(resolved))) => Resolution::Resolved(resolved.clone()),
            _ => Resolution::Unresolved,
        }
    }

    fn resolve_method_in(&self, exact_type: &str, index: u16) -> Option<ResolvedMethod> {
        self.implementations
            .get(&(exact_type.to_owned(), index))
            .cloned()
    }
}
