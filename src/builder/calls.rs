use super::{Bailout, BuilderCursor, GraphBuilder};
use crate::ir::{InvokeKind, NodeId, NodeKind, ValueKind};
use crate::jvm::{ConstantPool, InvokeType, RenderDescriptor, Resolution, ResolvedMethod};

impl<'a, P: ConstantPool + ?Sized> GraphBuilder<'a, P> {
    /// `getstatic`, `putstatic`, `getfield`, or `putfield`
    pub(super) fn access_field(
        &mut self,
        cursor: &mut BuilderCursor,
        cpi: u16,
        is_static: bool,
        is_store: bool,
    ) -> Result<(), Bailout> {
        let field = self.pool.field(cpi).ok_or(Bailout::InvalidConstant {
            bci: cursor.bci,
            cpi,
        })?;
        let field_kind = ValueKind::from_field_type(&field.descriptor);

        let mut operands = vec![];
        if !is_static {
            operands.push(ValueKind::Object);
        }
        if is_store {
            operands.push(field_kind);
        }
        let result = if is_store { ValueKind::Void } else { field_kind };

        if let Resolution::Unresolved = self.pool.resolve_field(cpi) {
            return self.deoptimize(cursor, cpi, &operands, result);
        }
        let inputs = cursor.state.pop_arguments(&operands)?;
        let field = format!("{}.{}", field.class, field.name);
        let kind = if is_store {
            NodeKind::StoreField { field, is_static }
        } else {
            NodeKind::LoadField { field, is_static }
        };

        // Only instance accesses can hit a `null`
        self.fixed(cursor, kind, result, inputs, !is_static)?;
        Ok(())
    }

    /// `invokevirtual`, `invokespecial`, `invokestatic`, or `invokeinterface`
    pub(super) fn invoke(
        &mut self,
        cursor: &mut BuilderCursor,
        invoke_type: InvokeType,
        cpi: u16,
    ) -> Result<(), Bailout> {
        let method = self.pool.method(cpi).ok_or(Bailout::InvalidConstant {
            bci: cursor.bci,
            cpi,
        })?;
        let mut argument_kinds: Vec<ValueKind> = method
            .descriptor
            .parameters
            .iter()
            .map(ValueKind::from_field_type)
            .collect();
        if invoke_type != InvokeType::Static {
            argument_kinds.insert(0, ValueKind::Object);
        }
        let result = ValueKind::from_return_type(method.descriptor.return_type.as_ref());

        let resolved = match self.pool.resolve_method(cpi) {
            Resolution::Resolved(resolved) => resolved,
            Resolution::Unresolved => {
                return self.deoptimize(cursor, cpi, &argument_kinds, result);
            }
        };
        let arguments = cursor.state.pop_arguments(&argument_kinds)?;

        let (kind, target) = match invoke_type {
            InvokeType::Static => (InvokeKind::Static, resolved),
            InvokeType::Special => (InvokeKind::Special, resolved),
            InvokeType::Virtual => {
                self.devirtualize(InvokeKind::Virtual, cpi, arguments[0], resolved)
            }
            InvokeType::Interface => {
                self.devirtualize(InvokeKind::Interface, cpi, arguments[0], resolved)
            }
        };
        let method = target.qualified_name();
        self.fixed(cursor, NodeKind::Invoke { kind, method }, result, arguments, true)?;
        Ok(())
    }

    pub(super) fn invoke_dynamic(
        &mut self,
        cursor: &mut BuilderCursor,
        cpi: u16,
    ) -> Result<(), Bailout> {
        let call_site = self
            .pool
            .invoke_dynamic(cpi)
            .ok_or(Bailout::InvalidConstant {
                bci: cursor.bci,
                cpi,
            })?;
        let argument_kinds: Vec<ValueKind> = call_site
            .descriptor
            .parameters
            .iter()
            .map(ValueKind::from_field_type)
            .collect();
        let result = ValueKind::from_return_type(call_site.descriptor.return_type.as_ref());

        let arguments = cursor.state.pop_arguments(&argument_kinds)?;
        let kind = NodeKind::Invoke {
            kind: InvokeKind::Dynamic,
            method: format!("{}{}", call_site.name, call_site.descriptor.render()),
        };
        self.fixed(cursor, kind, result, arguments, true)?;
        Ok(())
    }

    /// Try to turn an indirect call into a direct one
    ///
    /// That works when the resolved method can't be overridden, or when the exact type of the
    /// receiver is known (then the call is resolved against that type).
    fn devirtualize(
        &self,
        indirect: InvokeKind,
        cpi: u16,
        receiver: NodeId,
        resolved: ResolvedMethod,
    ) -> (InvokeKind, ResolvedMethod) {
        if !self.settings.devirtualize {
            return (indirect, resolved);
        }
        if resolved.is_statically_bound() {
            log::trace!("{} is statically bound", resolved.qualified_name());
            return (InvokeKind::Special, resolved);
        }
        if let Some(exact_type) = self.exact_types.get(&receiver) {
            if let Some(target) = self.pool.resolve_method_in(exact_type, cpi) {
                log::trace!(
                    "receiver {} is exactly {}: calling {}",
                    receiver,
                    exact_type,
                    target.qualified_name()
                );
                return (InvokeKind::Special, target);
            }
        }
        (indirect, resolved)
    }
}
