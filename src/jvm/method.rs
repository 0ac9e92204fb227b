use super::{Error, MethodAccessFlags, MethodDescriptor, ParseDescriptor};

/// Entry in the exception table of a `Code` attribute
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct ExceptionHandler {
    /// Start of the protected range (inclusive)
    pub start_bci: u32,

    /// End of the protected range (exclusive)
    pub end_bci: u32,

    /// Where the handler code starts
    pub handler_bci: u32,

    /// Class constant for the type of exception caught, or `None` for a catch-all (`finally`)
    pub catch_type: Option<u16>,
}

impl ExceptionHandler {
    /// Does the protected range include this bytecode offset?
    pub fn covers(&self, bci: u32) -> bool {
        self.start_bci <= bci && bci < self.end_bci
    }

    /// Does the protected range intersect `[start, end)`?
    pub fn overlaps(&self, start: u32, end: u32) -> bool {
        self.start_bci < end && start < self.end_bci
    }
}

/// Everything about a method needed to build its graph
#[derive(Clone, Debug)]
pub struct MethodInfo {
    /// Class declaring the method, written as `my/pkg/Klass`
    pub holder: String,
    pub name: String,
    pub descriptor: MethodDescriptor,
    pub access_flags: MethodAccessFlags,
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,

    /// Exception table, in declaration order
    pub exception_handlers: Vec<ExceptionHandler>,
}

impl MethodInfo {
    pub fn new(
        holder: &str,
        name: &str,
        descriptor: &str,
        access_flags: MethodAccessFlags,
        max_locals: u16,
        code: Vec<u8>,
    ) -> Result<MethodInfo, Error> {
        let descriptor = MethodDescriptor::parse(descriptor)
            .map_err(|_| Error::BadDescriptor(descriptor.to_owned()))?;
        Ok(MethodInfo {
            holder: holder.to_owned(),
            name: name.to_owned(),
            descriptor,
            access_flags,
            max_stack: u16::MAX,
            max_locals,
            code,
            exception_handlers: vec![],
        })
    }

    pub fn with_handler(mut self, handler: ExceptionHandler) -> MethodInfo {
        self.exception_handlers.push(handler);
        self
    }

    pub fn is_static(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::STATIC)
    }

    pub fn is_synchronized(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::SYNCHRONIZED)
    }

    /// Local variable slots taken by the receiver and parameters
    pub fn parameter_slots(&self) -> usize {
        self.descriptor.parameter_length(!self.is_static())
    }
}
