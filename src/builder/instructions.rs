use super::{
    Bailout, BuilderCursor, FrameState, FrameStateError, GraphBuilder, Value, RETURN_BLOCK,
};
use crate::ir::{ArithOp, Condition, Constant, ConvertOp, ElementType, NodeId, NodeKind, ValueKind};
use crate::jvm::{
    BaseType, BranchInstruction, CompareMode, ConstantData, ConstantPool, Instruction, Resolution,
};
use crate::util::Width;

impl<'a, P: ConstantPool + ?Sized> GraphBuilder<'a, P> {
    /// Build the nodes for a non-branching instruction
    pub fn build_instruction(
        &mut self,
        cursor: &mut BuilderCursor,
        instruction: Instruction,
    ) -> Result<(), Bailout> {
        use ElementType::Reference;
        use Instruction::*;
        use ValueKind::*;

        match instruction {
            Nop => (),

            AConstNull => self.constant(cursor, Constant::Null),
            IConstM1 => self.constant(cursor, Constant::Int(-1)),
            IConst0 => self.constant(cursor, Constant::Int(0)),
            IConst1 => self.constant(cursor, Constant::Int(1)),
            IConst2 => self.constant(cursor, Constant::Int(2)),
            IConst3 => self.constant(cursor, Constant::Int(3)),
            IConst4 => self.constant(cursor, Constant::Int(4)),
            IConst5 => self.constant(cursor, Constant::Int(5)),
            LConst0 => self.constant(cursor, Constant::Long(0)),
            LConst1 => self.constant(cursor, Constant::Long(1)),
            FConst0 => self.constant(cursor, Constant::float(0.0)),
            FConst1 => self.constant(cursor, Constant::float(1.0)),
            FConst2 => self.constant(cursor, Constant::float(2.0)),
            DConst0 => self.constant(cursor, Constant::double(0.0)),
            DConst1 => self.constant(cursor, Constant::double(1.0)),
            BiPush(b) => self.constant(cursor, Constant::Int(b as i32)),
            SiPush(s) => self.constant(cursor, Constant::Int(s as i32)),
            Ldc(cpi) | Ldc2(cpi) => {
                let constant = match self.pool.constant(cpi) {
                    Some(ConstantData::Integer(i)) => Constant::Int(i),
                    Some(ConstantData::Float(f)) => Constant::float(f),
                    Some(ConstantData::Long(l)) => Constant::Long(l),
                    Some(ConstantData::Double(d)) => Constant::double(d),
                    Some(ConstantData::String(s)) => Constant::String(s),
                    Some(ConstantData::Class(c)) => Constant::Class(c),
                    None => {
                        return Err(Bailout::InvalidConstant {
                            bci: cursor.bci,
                            cpi,
                        })
                    }
                };
                self.constant(cursor, constant);
            }

            ILoad(idx) => self.load_local(cursor, idx, Int)?,
            LLoad(idx) => self.load_local(cursor, idx, Long)?,
            FLoad(idx) => self.load_local(cursor, idx, Float)?,
            DLoad(idx) => self.load_local(cursor, idx, Double)?,
            ALoad(idx) => self.load_local(cursor, idx, Object)?,

            IALoad => self.load_indexed(cursor, ElementType::Base(BaseType::Int))?,
            LALoad => self.load_indexed(cursor, ElementType::Base(BaseType::Long))?,
            FALoad => self.load_indexed(cursor, ElementType::Base(BaseType::Float))?,
            DALoad => self.load_indexed(cursor, ElementType::Base(BaseType::Double))?,
            AALoad => self.load_indexed(cursor, Reference)?,
            BALoad => self.load_indexed(cursor, ElementType::Base(BaseType::Byte))?,
            CALoad => self.load_indexed(cursor, ElementType::Base(BaseType::Char))?,
            SALoad => self.load_indexed(cursor, ElementType::Base(BaseType::Short))?,

            IStore(idx) => self.store_local(cursor, idx, Int)?,
            LStore(idx) => self.store_local(cursor, idx, Long)?,
            FStore(idx) => self.store_local(cursor, idx, Float)?,
            DStore(idx) => self.store_local(cursor, idx, Double)?,
            AStore(idx) => self.store_local(cursor, idx, Object)?,

            IAStore => self.store_indexed(cursor, ElementType::Base(BaseType::Int))?,
            LAStore => self.store_indexed(cursor, ElementType::Base(BaseType::Long))?,
            FAStore => self.store_indexed(cursor, ElementType::Base(BaseType::Float))?,
            DAStore => self.store_indexed(cursor, ElementType::Base(BaseType::Double))?,
            AAStore => self.store_indexed(cursor, Reference)?,
            BAStore => self.store_indexed(cursor, ElementType::Base(BaseType::Byte))?,
            CAStore => self.store_indexed(cursor, ElementType::Base(BaseType::Char))?,
            SAStore => self.store_indexed(cursor, ElementType::Base(BaseType::Short))?,

            Pop | Pop2 | Dup | DupX1 | DupX2 | Dup2 | Dup2X1 | Dup2X2 | Swap => {
                shuffle_stack(&mut cursor.state, &instruction)?
            }

            IAdd => self.arithmetic(cursor, ArithOp::Add, Int)?,
            LAdd => self.arithmetic(cursor, ArithOp::Add, Long)?,
            FAdd => self.arithmetic(cursor, ArithOp::Add, Float)?,
            DAdd => self.arithmetic(cursor, ArithOp::Add, Double)?,
            ISub => self.arithmetic(cursor, ArithOp::Sub, Int)?,
            LSub => self.arithmetic(cursor, ArithOp::Sub, Long)?,
            FSub => self.arithmetic(cursor, ArithOp::Sub, Float)?,
            DSub => self.arithmetic(cursor, ArithOp::Sub, Double)?,
            IMul => self.arithmetic(cursor, ArithOp::Mul, Int)?,
            LMul => self.arithmetic(cursor, ArithOp::Mul, Long)?,
            FMul => self.arithmetic(cursor, ArithOp::Mul, Float)?,
            DMul => self.arithmetic(cursor, ArithOp::Mul, Double)?,
            IDiv => self.integer_div_rem(cursor, ArithOp::Div, Int)?,
            LDiv => self.integer_div_rem(cursor, ArithOp::Div, Long)?,
            FDiv => self.arithmetic(cursor, ArithOp::Div, Float)?,
            DDiv => self.arithmetic(cursor, ArithOp::Div, Double)?,
            IRem => self.integer_div_rem(cursor, ArithOp::Rem, Int)?,
            LRem => self.integer_div_rem(cursor, ArithOp::Rem, Long)?,
            FRem => self.arithmetic(cursor, ArithOp::Rem, Float)?,
            DRem => self.arithmetic(cursor, ArithOp::Rem, Double)?,
            INeg => self.unary(cursor, NodeKind::Negate, Int, Int)?,
            LNeg => self.unary(cursor, NodeKind::Negate, Long, Long)?,
            FNeg => self.unary(cursor, NodeKind::Negate, Float, Float)?,
            DNeg => self.unary(cursor, NodeKind::Negate, Double, Double)?,
            ISh(shift) | LSh(shift) => {
                let kind = if let ISh(_) = instruction { Int } else { Long };
                let distance = cursor.state.pop(Int)?;
                let value = cursor.state.pop(kind)?;
                self.floating(cursor, NodeKind::Shift(shift), kind, vec![value, distance]);
            }
            IAnd => self.arithmetic(cursor, ArithOp::And, Int)?,
            LAnd => self.arithmetic(cursor, ArithOp::And, Long)?,
            IOr => self.arithmetic(cursor, ArithOp::Or, Int)?,
            LOr => self.arithmetic(cursor, ArithOp::Or, Long)?,
            IXor => self.arithmetic(cursor, ArithOp::Xor, Int)?,
            LXor => self.arithmetic(cursor, ArithOp::Xor, Long)?,
            IInc(idx, increment) => {
                let value = cursor.state.load_local(idx, Int)?;
                let increment = self.graph.constant(Constant::Int(increment as i32));
                let sum = self.graph.add(
                    NodeKind::Arithmetic(ArithOp::Add),
                    Int,
                    vec![value, increment],
                );
                self.graph.set_bci(sum, cursor.bci);
                cursor.state.store_local(idx, Value::new(sum, Int))?;
            }

            I2L => self.convert(cursor, ConvertOp::I2L, Int, Long)?,
            I2F => self.convert(cursor, ConvertOp::I2F, Int, Float)?,
            I2D => self.convert(cursor, ConvertOp::I2D, Int, Double)?,
            L2I => self.convert(cursor, ConvertOp::L2I, Long, Int)?,
            L2F => self.convert(cursor, ConvertOp::L2F, Long, Float)?,
            L2D => self.convert(cursor, ConvertOp::L2D, Long, Double)?,
            F2I => self.convert(cursor, ConvertOp::F2I, Float, Int)?,
            F2L => self.convert(cursor, ConvertOp::F2L, Float, Long)?,
            F2D => self.convert(cursor, ConvertOp::F2D, Float, Double)?,
            D2I => self.convert(cursor, ConvertOp::D2I, Double, Int)?,
            D2L => self.convert(cursor, ConvertOp::D2L, Double, Long)?,
            D2F => self.convert(cursor, ConvertOp::D2F, Double, Float)?,
            I2B => self.convert(cursor, ConvertOp::I2B, Int, Int)?,
            I2C => self.convert(cursor, ConvertOp::I2C, Int, Int)?,
            I2S => self.convert(cursor, ConvertOp::I2S, Int, Int)?,

            LCmp => self.compare(cursor, None, Long)?,
            FCmp(mode) => self.compare(cursor, Some(mode), Float)?,
            DCmp(mode) => self.compare(cursor, Some(mode), Double)?,

            GetStatic(cpi) => self.access_field(cursor, cpi, true, false)?,
            PutStatic(cpi) => self.access_field(cursor, cpi, true, true)?,
            GetField(cpi) => self.access_field(cursor, cpi, false, false)?,
            PutField(cpi) => self.access_field(cursor, cpi, false, true)?,

            Invoke(invoke_type, cpi) => self.invoke(cursor, invoke_type, cpi)?,
            InvokeDynamic(cpi) => self.invoke_dynamic(cursor, cpi)?,

            New(cpi) => {
                let class = self.class_name(cursor, cpi)?;
                if let Resolution::Unresolved = self.pool.resolve_type(cpi) {
                    return Err(Bailout::UnresolvedMandatory {
                        bci: cursor.bci,
                        cpi,
                    });
                }
                let node = self.fixed(
                    cursor,
                    NodeKind::NewInstance {
                        class: class.clone(),
                    },
                    Object,
                    vec![],
                    true,
                )?;
                self.exact_types.insert(node, class);
            }
            NewArray(base_type) => {
                let length = cursor.state.pop(Int)?;
                self.fixed(cursor, NodeKind::NewArray(base_type), Object, vec![length], true)?;
            }
            ANewArray(cpi) => {
                let class = self.class_name(cursor, cpi)?;
                if let Resolution::Unresolved = self.pool.resolve_type(cpi) {
                    return self.deoptimize(cursor, cpi, &[Int], Object);
                }
                let length = cursor.state.pop(Int)?;
                let kind = NodeKind::NewObjectArray { class };
                self.fixed(cursor, kind, Object, vec![length], true)?;
            }
            MultiANewArray(cpi, dimensions) => {
                let class = self.class_name(cursor, cpi)?;
                let lengths = vec![Int; dimensions as usize];
                if let Resolution::Unresolved = self.pool.resolve_type(cpi) {
                    return self.deoptimize(cursor, cpi, &lengths, Object);
                }
                let lengths = cursor.state.pop_arguments(&lengths)?;
                self.fixed(cursor, NodeKind::NewMultiArray { class }, Object, lengths, true)?;
            }
            ArrayLength => {
                let array = cursor.state.pop(Object)?;
                self.fixed(cursor, NodeKind::ArrayLength, Int, vec![array], true)?;
            }

            CheckCast(cpi) => {
                let class = self.class_name(cursor, cpi)?;
                let resolved = match self.pool.resolve_type(cpi) {
                    Resolution::Resolved(resolved) => resolved,
                    Resolution::Unresolved => {
                        return self.deoptimize(cursor, cpi, &[Object], Object)
                    }
                };
                let object = cursor.state.pop(Object)?;
                let kind = NodeKind::CheckCast {
                    class: class.clone(),
                };
                let node = self.fixed(cursor, kind, Object, vec![object], true)?;
                if resolved.is_leaf() {
                    self.exact_types.insert(node, class);
                }
            }
            InstanceOf(cpi) => {
                let class = self.class_name(cursor, cpi)?;
                if let Resolution::Unresolved = self.pool.resolve_type(cpi) {
                    return self.deoptimize(cursor, cpi, &[Object], Int);
                }
                let object = cursor.state.pop(Object)?;
                self.floating(cursor, NodeKind::InstanceOf { class }, Int, vec![object]);
            }

            MonitorEnter => {
                let object = cursor.state.pop(Object)?;
                let enter = self.graph.add(NodeKind::MonitorEnter, Void, vec![object]);
                self.append(cursor, enter);
                self.exception_edge(cursor, enter)?;
                cursor.state.push_lock(object);
                self.attach_state(enter, &cursor.state, cursor.next_bci);
            }
            MonitorExit => {
                // Exceptions leave with the lock still held
                let object = cursor.state.pop(Object)?;
                let exit = self.graph.add(NodeKind::MonitorExit, Void, vec![object]);
                self.append(cursor, exit);
                self.exception_edge(cursor, exit)?;
                cursor.state.pop_lock()?;
                self.attach_state(exit, &cursor.state, cursor.next_bci);
            }
        }
        Ok(())
    }

    /// Build the nodes for an instruction ending a block
    pub fn build_branch(
        &mut self,
        cursor: &mut BuilderCursor,
        branch: BranchInstruction,
    ) -> Result<(), Bailout> {
        use BranchInstruction::*;
        use ValueKind::*;

        match branch {
            If(comparison, target) => {
                let value = cursor.state.pop(Int)?;
                let zero = self.graph.constant(Constant::Int(0));
                self.conditional(cursor, Condition::Int(comparison), value, zero, target)?;
            }
            IfICmp(comparison, target) => {
                let value2 = cursor.state.pop(Int)?;
                let value1 = cursor.state.pop(Int)?;
                self.conditional(cursor, Condition::Int(comparison), value1, value2, target)?;
            }
            IfACmp(comparison, target) => {
                let value2 = cursor.state.pop(Object)?;
                let value1 = cursor.state.pop(Object)?;
                let condition = Condition::Reference(comparison);
                self.conditional(cursor, condition, value1, value2, target)?;
            }
            IfNull(comparison, target) => {
                let value = cursor.state.pop(Object)?;
                let null = self.graph.constant(Constant::Null);
                let condition = Condition::Reference(comparison);
                self.conditional(cursor, condition, value, null, target)?;
            }
            Goto(target) => {
                let block = self.block_at(cursor, target)?;
                let last = cursor.take_last()?;
                let state = cursor.state.duplicate(target);
                self.jump_to(last, 0, block, state)?;
            }
            TableSwitch {
                default,
                low,
                targets,
            } => {
                let keys = (0..targets.len() as i32)
                    .map(|offset| low.wrapping_add(offset))
                    .collect();
                self.switch(cursor, keys, targets, default)?;
            }
            LookupSwitch { default, targets } => {
                let (keys, targets) = targets.into_iter().unzip();
                self.switch(cursor, keys, targets, default)?;
            }
            IReturn => self.return_value(cursor, Some(Int))?,
            LReturn => self.return_value(cursor, Some(Long))?,
            FReturn => self.return_value(cursor, Some(Float))?,
            DReturn => self.return_value(cursor, Some(Double))?,
            AReturn => self.return_value(cursor, Some(Object))?,
            Return => self.return_value(cursor, None)?,
            AThrow => {
                let exception = cursor.state.pop(Object)?;
                let last = cursor.take_last()?;
                let mut state = cursor.state.duplicate(cursor.bci);
                state.clear_stack();
                state.push(Object, exception);
                self.dispatch_exception(last, 0, exception, state, cursor.bci)?;
            }
        }
        Ok(())
    }

    fn load_local(
        &mut self,
        cursor: &mut BuilderCursor,
        idx: u16,
        kind: ValueKind,
    ) -> Result<(), Bailout> {
        let value = cursor.state.load_local(idx, kind)?;
        cursor.state.push(kind, value);
        Ok(())
    }

    fn store_local(
        &mut self,
        cursor: &mut BuilderCursor,
        idx: u16,
        kind: ValueKind,
    ) -> Result<(), Bailout> {
        let value = cursor.state.pop(kind)?;
        cursor.state.store_local(idx, Value::new(value, kind))?;
        Ok(())
    }

    fn load_indexed(
        &mut self,
        cursor: &mut BuilderCursor,
        element: ElementType,
    ) -> Result<(), Bailout> {
        let index = cursor.state.pop(ValueKind::Int)?;
        let array = cursor.state.pop(ValueKind::Object)?;
        let kind = NodeKind::LoadIndexed(element);
        self.fixed(cursor, kind, element.value_kind(), vec![array, index], true)?;
        Ok(())
    }

    fn store_indexed(
        &mut self,
        cursor: &mut BuilderCursor,
        element: ElementType,
    ) -> Result<(), Bailout> {
        let value = cursor.state.pop(element.value_kind())?;
        let index = cursor.state.pop(ValueKind::Int)?;
        let array = cursor.state.pop(ValueKind::Object)?;
        let kind = NodeKind::StoreIndexed(element);
        self.fixed(cursor, kind, ValueKind::Void, vec![array, index, value], true)?;
        Ok(())
    }

    fn arithmetic(
        &mut self,
        cursor: &mut BuilderCursor,
        op: ArithOp,
        kind: ValueKind,
    ) -> Result<(), Bailout> {
        let value2 = cursor.state.pop(kind)?;
        let value1 = cursor.state.pop(kind)?;
        self.floating(cursor, NodeKind::Arithmetic(op), kind, vec![value1, value2]);
        Ok(())
    }

    /// Integer division and remainder throw `ArithmeticException` on zero, so they are fixed
    fn integer_div_rem(
        &mut self,
        cursor: &mut BuilderCursor,
        op: ArithOp,
        kind: ValueKind,
    ) -> Result<(), Bailout> {
        let value2 = cursor.state.pop(kind)?;
        let value1 = cursor.state.pop(kind)?;
        let node_kind = NodeKind::IntegerDivRem(op);
        self.fixed(cursor, node_kind, kind, vec![value1, value2], true)?;
        Ok(())
    }

    fn unary(
        &mut self,
        cursor: &mut BuilderCursor,
        node_kind: NodeKind,
        from: ValueKind,
        to: ValueKind,
    ) -> Result<(), Bailout> {
        let value = cursor.state.pop(from)?;
        self.floating(cursor, node_kind, to, vec![value]);
        Ok(())
    }

    fn convert(
        &mut self,
        cursor: &mut BuilderCursor,
        op: ConvertOp,
        from: ValueKind,
        to: ValueKind,
    ) -> Result<(), Bailout> {
        self.unary(cursor, NodeKind::Convert(op), from, to)
    }

    fn compare(
        &mut self,
        cursor: &mut BuilderCursor,
        mode: Option<CompareMode>,
        kind: ValueKind,
    ) -> Result<(), Bailout> {
        let value2 = cursor.state.pop(kind)?;
        let value1 = cursor.state.pop(kind)?;
        let node_kind = NodeKind::Compare(mode);
        self.floating(cursor, node_kind, ValueKind::Int, vec![value1, value2]);
        Ok(())
    }

    /// Binary name of a class constant
    pub(super) fn class_name(&self, cursor: &BuilderCursor, cpi: u16) -> Result<String, Bailout> {
        self.pool.class(cpi).ok_or(Bailout::InvalidConstant {
            bci: cursor.bci,
            cpi,
        })
    }

    /// Two-way branch: successor 0 is the jump target, successor 1 the next instruction
    fn conditional(
        &mut self,
        cursor: &mut BuilderCursor,
        condition: Condition,
        value1: NodeId,
        value2: NodeId,
        target: u32,
    ) -> Result<(), Bailout> {
        let taken = self.block_at(cursor, target)?;
        let not_taken = self.block_at(cursor, cursor.next_bci)?;

        let node = self
            .graph
            .add(NodeKind::If(condition), ValueKind::Void, vec![value1, value2]);
        self.append(cursor, node);
        let last = cursor.take_last()?;
        self.jump_to(last, 0, taken, cursor.state.duplicate(target))?;
        self.jump_to(last, 1, not_taken, cursor.state.duplicate(cursor.next_bci))?;
        Ok(())
    }

    fn switch(
        &mut self,
        cursor: &mut BuilderCursor,
        keys: Vec<i32>,
        targets: Vec<u32>,
        default: u32,
    ) -> Result<(), Bailout> {
        let key = cursor.state.pop(ValueKind::Int)?;
        let blocks = targets
            .iter()
            .chain(std::iter::once(&default))
            .map(|target| Ok((*target, self.block_at(cursor, *target)?)))
            .collect::<Result<Vec<_>, Bailout>>()?;

        let node = self
            .graph
            .add(NodeKind::Switch(keys), ValueKind::Void, vec![key]);
        self.append(cursor, node);
        let last = cursor.take_last()?;
        for (index, (target, block)) in blocks.into_iter().enumerate() {
            self.jump_to(last, index, block, cursor.state.duplicate(target))?;
        }
        Ok(())
    }

    /// Jump to the return block with only the returned value left in the state
    fn return_value(
        &mut self,
        cursor: &mut BuilderCursor,
        kind: Option<ValueKind>,
    ) -> Result<(), Bailout> {
        let value = match kind {
            Some(kind) => Some((kind, cursor.state.pop(kind)?)),
            None => None,
        };
        let last = cursor.take_last()?;
        let mut state = cursor.state.duplicate(cursor.bci);
        state.clear_locals();
        state.clear_stack();
        if let Some((kind, value)) = value {
            state.push(kind, value);
        }
        self.jump_to(last, 0, RETURN_BLOCK, state)
    }
}

/// Apply one of the untyped stack manipulation instructions
///
/// These only look at widths, since they work the same on any kind of value.
fn shuffle_stack(stack: &mut FrameState, instruction: &Instruction) -> Result<(), FrameStateError> {
    use Instruction::*;

    match instruction {
        Pop => {
            stack.pop_expecting_width(1)?;
        }

        Pop2 => {
            let arg1 = stack.pop_value()?;
            match arg1.width() {
                // Form 1
                1 => {
                    stack.pop_expecting_width(1)?;
                }

                // Form 2
                2 => (),

                other => return Err(FrameStateError::InvalidWidth(other)),
            }
        }

        Dup => {
            let arg1 = stack.pop_expecting_width(1)?;
            stack.push_value(arg1);
            stack.push_value(arg1);
        }

        DupX1 => {
            let arg1 = stack.pop_expecting_width(1)?;
            let arg2 = stack.pop_expecting_width(1)?;
            stack.push_value(arg1);
            stack.push_value(arg2);
            stack.push_value(arg1);
        }

        DupX2 => {
            let arg1 = stack.pop_expecting_width(1)?;
            let arg2 = stack.pop_value()?;
            match arg2.width() {
                // Form 1
                1 => {
                    let arg3 = stack.pop_expecting_width(1)?;
                    stack.push_value(arg1);
                    stack.push_value(arg3);
                    stack.push_value(arg2);
                    stack.push_value(arg1);
                }

                // Form 2
                2 => {
                    stack.push_value(arg1);
                    stack.push_value(arg2);
                    stack.push_value(arg1);
                }

                other => return Err(FrameStateError::InvalidWidth(other)),
            }
        }

        Dup2 => {
            let arg1 = stack.pop_value()?;
            match arg1.width() {
                // Form 1
                1 => {
                    let arg2 = stack.pop_expecting_width(1)?;
                    stack.push_value(arg2);
                    stack.push_value(arg1);
                    stack.push_value(arg2);
                    stack.push_value(arg1);
                }

                // Form 2
                2 => {
                    stack.push_value(arg1);
                    stack.push_value(arg1);
                }

                other => return Err(FrameStateError::InvalidWidth(other)),
            }
        }

        Dup2X1 => {
            let arg1 = stack.pop_value()?;
            let arg2 = stack.pop_expecting_width(1)?;
            match arg1.width() {
                // Form 1
                1 => {
                    let arg3 = stack.pop_expecting_width(1)?;
                    stack.push_value(arg2);
                    stack.push_value(arg1);
                    stack.push_value(arg3);
                    stack.push_value(arg2);
                    stack.push_value(arg1);
                }

                // Form 2
                2 => {
                    stack.push_value(arg1);
                    stack.push_value(arg2);
                    stack.push_value(arg1);
                }

                other => return Err(FrameStateError::InvalidWidth(other)),
            }
        }

        Dup2X2 => {
            let arg1 = stack.pop_value()?;
            match arg1.width() {
                1 => {
                    let arg2 = stack.pop_expecting_width(1)?;
                    let arg3 = stack.pop_value()?;
                    match arg3.width() {
                        // Form 1
                        1 => {
                            let arg4 = stack.pop_expecting_width(1)?;
                            stack.push_value(arg2);
                            stack.push_value(arg1);
                            stack.push_value(arg4);
                            stack.push_value(arg3);
                            stack.push_value(arg2);
                            stack.push_value(arg1);
                        }

                        // Form 3
                        2 => {
                            stack.push_value(arg2);
                            stack.push_value(arg1);
                            stack.push_value(arg3);
                            stack.push_value(arg2);
                            stack.push_value(arg1);
                        }

                        other => return Err(FrameStateError::InvalidWidth(other)),
                    }
                }
                2 => {
                    let arg2 = stack.pop_value()?;
                    match arg2.width() {
                        // Form 2
                        1 => {
                            let arg3 = stack.pop_expecting_width(1)?;
                            stack.push_value(arg1);
                            stack.push_value(arg3);
                            stack.push_value(arg2);
                            stack.push_value(arg1);
                        }

                        // Form 4
                        2 => {
                            stack.push_value(arg1);
                            stack.push_value(arg2);
                            stack.push_value(arg1);
                        }

                        other => return Err(FrameStateError::InvalidWidth(other)),
                    }
                }
                other => return Err(FrameStateError::InvalidWidth(other)),
            }
        }

        Swap => {
            let arg1 = stack.pop_expecting_width(1)?;
            let arg2 = stack.pop_expecting_width(1)?;
            stack.push_value(arg1);
            stack.push_value(arg2);
        }

        _ => (),
    }
    Ok(())
}
