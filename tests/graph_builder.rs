use bc2ir::builder::{build_graph, Bailout, Settings};
use bc2ir::ir::{
    eliminate_dead_code, ArithOp, Condition, Constant, ConvertOp, ElementType, Graph, InvokeKind,
    NodeId, NodeKind, ValueKind, EXIT_BCI,
};
use bc2ir::jvm::{
    BaseType, ClassAccessFlags, CompareMode, ExceptionHandler, FieldAccessFlags, FieldRef,
    InvokeDynamicRef, MethodAccessFlags, MethodDescriptor, MethodInfo, MethodRef,
    OrdComparison, ParseDescriptor, ResolvedField, ResolvedMethod, ShiftType, SimpleConstantPool,
};

fn static_method(descriptor: &str, max_locals: u16, code: Vec<u8>) -> MethodInfo {
    let flags = MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC;
    MethodInfo::new("Test", "test", descriptor, flags, max_locals, code).unwrap()
}

fn resolved(
    holder: &str,
    name: &str,
    descriptor: &str,
    flags: MethodAccessFlags,
) -> ResolvedMethod {
    ResolvedMethod {
        holder: holder.to_owned(),
        name: name.to_owned(),
        descriptor: ParseDescriptor::parse(descriptor).unwrap(),
        access_flags: flags,
        holder_flags: ClassAccessFlags::PUBLIC,
    }
}

/// Pool with static `()V` methods `a`, `b`, and `c` at 1, 4, and 5, and two exception classes
fn exceptions_pool() -> SimpleConstantPool {
    let mut pool = SimpleConstantPool::new();
    let flags = MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC;
    for (idx, name) in [(1, "a"), (4, "b"), (5, "c")] {
        let method = MethodRef::new("Test", name, "()V").unwrap();
        pool.add_method(idx, method, Some(resolved("Test", name, "()V", flags)));
    }
    pool.add_class(2, "java/lang/ArithmeticException", Some(ClassAccessFlags::PUBLIC));
    pool.add_class(3, "java/lang/Exception", Some(ClassAccessFlags::PUBLIC));
    pool
}

fn build(method: &MethodInfo, pool: &SimpleConstantPool) -> Graph {
    build_graph(method, pool, &Settings::new()).unwrap()
}

fn find(graph: &Graph, predicate: impl Fn(&NodeKind) -> bool) -> Vec<NodeId> {
    graph.filter(|node| predicate(&node.kind))
}

fn constant(graph: &Graph, value: Constant) -> NodeId {
    let found = find(graph, |kind| *kind == NodeKind::Constant(value.clone()));
    assert_eq!(found.len(), 1, "expected one {} constant", value);
    found[0]
}

fn invoke_of(graph: &Graph, method: &str) -> NodeId {
    let found = find(graph, |kind| {
        matches!(kind, NodeKind::Invoke { method: m, .. } if m == method)
    });
    assert_eq!(found.len(), 1, "expected one call to {}", method);
    found[0]
}

fn parameter(graph: &Graph, slot: u16) -> NodeId {
    let found = find(graph, |kind| *kind == NodeKind::Parameter(slot));
    assert_eq!(found.len(), 1, "expected one parameter in slot {}", slot);
    found[0]
}

fn single(graph: &Graph, predicate: impl Fn(&NodeKind) -> bool) -> NodeId {
    let found = find(graph, predicate);
    assert_eq!(found.len(), 1, "expected exactly one match, found {:?}", found);
    found[0]
}

/// Follow successor `index`, then skip over merges and ends
fn follow(graph: &Graph, node: NodeId, index: usize) -> NodeId {
    let mut next = graph[node].successor(index).expect("missing successor");
    while matches!(graph[next].kind, NodeKind::Merge | NodeKind::End) {
        next = graph[next].successor(0).expect("merge without successor");
    }
    next
}

/// Merge reached through successor `index` of `from`, and the position of that edge among the
/// predecessors of the merge (which is also the position of its phi inputs)
fn entry_edge(graph: &Graph, from: NodeId, index: usize) -> (NodeId, usize) {
    let mut pred = from;
    let mut next = graph[from].successor(index).expect("missing successor");
    while !graph[next].kind.is_merge() {
        pred = next;
        next = graph[next].successor(0).expect("edge leads nowhere");
    }
    let position = graph[next]
        .predecessors
        .iter()
        .position(|p| *p == pred)
        .expect("edge missing from the predecessors");
    (next, position)
}

fn assert_ssa(graph: &Graph) {
    for merge in graph.filter(|node| node.kind.is_merge()) {
        let mut distinct = graph[merge].predecessors.clone();
        distinct.sort();
        distinct.dedup();
        assert_eq!(
            distinct.len(),
            graph[merge].predecessors.len(),
            "{} is entered twice from the same node",
            merge
        );
    }
    for phi in find(graph, |kind| *kind == NodeKind::Phi) {
        let merge = graph[phi].inputs[0];
        assert_eq!(
            graph[phi].inputs.len() - 1,
            graph[merge].predecessors.len(),
            "{} has the wrong number of inputs for {}",
            phi,
            merge
        );
    }
    assert!(find(graph, |kind| *kind == NodeKind::Placeholder).is_empty());
}

/// `if (x == 0) push a else push b; return`
fn diamond(a: u8, b: u8) -> MethodInfo {
    let code = vec![
        0x1a, // 0: iload_0
        0x99, 0x00, 0x07, // 1: ifeq 8
        a,    // 4: iconst_a
        0xa7, 0x00, 0x04, // 5: goto 9
        b,    // 8: iconst_b
        0xac, // 9: ireturn
    ];
    static_method("(I)I", 1, code)
}

#[test]
fn identical_values_need_no_phi() {
    let graph = build(&diamond(0x04, 0x04), &SimpleConstantPool::new());
    assert!(find(&graph, |kind| *kind == NodeKind::Phi).is_empty());

    let one = constant(&graph, Constant::Int(1));
    let ret = find(&graph, |kind| *kind == NodeKind::Return);
    assert_eq!(ret.len(), 1);
    assert_eq!(graph[ret[0]].inputs, vec![one]);
}

#[test]
fn different_values_get_one_phi() {
    let graph = build(&diamond(0x04, 0x05), &SimpleConstantPool::new());
    assert_ssa(&graph);

    let phis = find(&graph, |kind| *kind == NodeKind::Phi);
    assert_eq!(phis.len(), 1);
    let one = constant(&graph, Constant::Int(1));
    let two = constant(&graph, Constant::Int(2));

    // Each branch edge enters the merge on its own, and brings its own value
    let branch = single(&graph, |kind| matches!(kind, NodeKind::If(_)));
    let (merge, taken) = entry_edge(&graph, branch, 0);
    let (other_merge, fallthrough) = entry_edge(&graph, branch, 1);
    assert_eq!(merge, other_merge);
    assert_ne!(taken, fallthrough);
    let phi = &graph[phis[0]];
    assert_eq!(phi.inputs[0], merge);
    assert_eq!(phi.inputs[1 + taken], two);
    assert_eq!(phi.inputs[1 + fallthrough], one);

    let ret = find(&graph, |kind| *kind == NodeKind::Return);
    assert_eq!(graph[ret[0]].inputs, vec![phis[0]]);
}

#[test]
fn duplicate_edges_stay_apart() {
    // ifeq to the next instruction: both edges of the branch reach the same block
    let code = vec![
        0x1a, // 0: iload_0
        0x99, 0x00, 0x03, // 1: ifeq 4
        0xb1, // 4: return
    ];
    let graph = build(&static_method("(I)V", 1, code), &SimpleConstantPool::new());
    assert_ssa(&graph);

    let branch = single(&graph, |kind| matches!(kind, NodeKind::If(_)));
    let merge = graph[branch].successor(0).unwrap();
    assert_eq!(graph[merge].kind, NodeKind::Merge);
    let end = graph[branch].successor(1).unwrap();
    assert_eq!(graph[end].kind, NodeKind::End);
    assert_eq!(graph[end].successor(0), Some(merge));
    assert_eq!(graph[merge].predecessors, vec![branch, end]);
    assert_eq!(graph[follow(&graph, merge, 0)].kind, NodeKind::Return);

    // Two lookupswitch keys sharing a target
    let code = vec![
        0x1a, // 0: iload_0
        0xab, 0x00, 0x00, // 1: lookupswitch (padded)
        0x00, 0x00, 0x00, 0x1d, // default: 30
        0x00, 0x00, 0x00, 0x02, // npairs: 2
        0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x1b, // 1: 28
        0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, 0x1b, // 2: 28
        0x04, 0xac, // 28: iconst_1; ireturn
        0x03, 0xac, // 30: iconst_0; ireturn
    ];
    let graph = build(&static_method("(I)I", 1, code), &SimpleConstantPool::new());
    assert_ssa(&graph);

    let switch = single(&graph, |kind| matches!(kind, NodeKind::Switch(_)));
    assert_eq!(graph[switch].kind, NodeKind::Switch(vec![1, 2]));
    assert_eq!(graph[switch].successors.len(), 3);
    let shared = graph[switch].successor(0).unwrap();
    assert_eq!(graph[shared].kind, NodeKind::Merge);
    let end = graph[switch].successor(1).unwrap();
    assert_eq!(graph[end].kind, NodeKind::End);
    assert_eq!(graph[shared].predecessors, vec![switch, end]);

    let one = constant(&graph, Constant::Int(1));
    let zero = constant(&graph, Constant::Int(0));
    let phi = single(&graph, |kind| *kind == NodeKind::Phi);
    let (exit, keyed) = entry_edge(&graph, shared, 0);
    let (other_exit, default) = entry_edge(&graph, switch, 2);
    assert_eq!(exit, other_exit);
    assert_eq!(graph[phi].inputs[1 + keyed], one);
    assert_eq!(graph[phi].inputs[1 + default], zero);
    assert_eq!(graph[follow(&graph, exit, 0)].inputs, vec![phi]);
}

#[test]
fn counting_loop() {
    let code = vec![
        0x03, // 0: iconst_0
        0x3c, // 1: istore_1
        0x1b, // 2: iload_1
        0x1a, // 3: iload_0
        0xa2, 0x00, 0x09, // 4: if_icmpge 13
        0x84, 0x01, 0x01, // 7: iinc 1 1
        0xa7, 0xff, 0xf8, // 10: goto 2
        0x1b, // 13: iload_1
        0xac, // 14: ireturn
    ];
    let graph = build(&static_method("(I)I", 2, code), &SimpleConstantPool::new());
    assert_ssa(&graph);

    let begins = find(&graph, |kind| *kind == NodeKind::LoopBegin);
    let ends = find(&graph, |kind| *kind == NodeKind::LoopEnd);
    assert_eq!(begins.len(), 1);
    assert_eq!(ends.len(), 1);
    let (begin, end) = (begins[0], ends[0]);
    assert_eq!(graph[begin].predecessors, vec![graph.start(), end]);
    assert_eq!(graph[end].successor(0), Some(begin));

    // The loop-invariant parameter does not keep its phi
    let phis = graph.phis(begin);
    assert_eq!(phis.len(), 1);
    let zero = constant(&graph, Constant::Int(0));
    let add = graph[phis[0]].inputs[2];
    assert_eq!(graph[phis[0]].inputs[1], zero);
    assert_eq!(graph[add].kind, NodeKind::Arithmetic(bc2ir::ir::ArithOp::Add));
    assert_eq!(graph[add].inputs[0], phis[0]);
}

#[test]
fn loop_without_back_edge_becomes_merge() {
    // The only back edge comes from a handler whose catch type never resolves
    let code = vec![
        0xb8, 0x00, 0x01, // 0: invokestatic a
        0xb1, // 3: return
        0x57, // 4: pop
        0xa7, 0xff, 0xfb, // 5: goto 0
    ];
    let method = static_method("()V", 0, code).with_handler(ExceptionHandler {
        start_bci: 0,
        end_bci: 3,
        handler_bci: 4,
        catch_type: Some(2),
    });
    let mut pool = exceptions_pool();
    pool.add_class(2, "java/lang/ArithmeticException", None);
    let graph = build(&method, &pool);
    assert_ssa(&graph);

    assert!(find(&graph, |kind| *kind == NodeKind::LoopBegin).is_empty());
    assert!(find(&graph, |kind| *kind == NodeKind::LoopEnd).is_empty());
    assert_eq!(find(&graph, |kind| *kind == NodeKind::Deoptimize { cpi: 2 }).len(), 1);
    assert!(find(&graph, |kind| *kind == NodeKind::Unwind).is_empty());
}

/// ```text
/// try {
///   a();
///   try { a(); } catch (ArithmeticException e) { b(); }
///   a();
/// } catch (Exception e) { c(); }
/// ```
fn nested_try_catch() -> MethodInfo {
    let code = vec![
        0xb8, 0x00, 0x01, // 0: invokestatic a
        0xb8, 0x00, 0x01, // 3: invokestatic a
        0xb8, 0x00, 0x01, // 6: invokestatic a
        0xb1, // 9: return
        0x57, // 10: pop
        0xb8, 0x00, 0x04, // 11: invokestatic b
        0xb1, // 14: return
        0x57, // 15: pop
        0xb8, 0x00, 0x05, // 16: invokestatic c
        0xb1, // 19: return
    ];
    static_method("()V", 0, code)
        .with_handler(ExceptionHandler {
            start_bci: 3,
            end_bci: 6,
            handler_bci: 10,
            catch_type: Some(2),
        })
        .with_handler(ExceptionHandler {
            start_bci: 3,
            end_bci: 9,
            handler_bci: 15,
            catch_type: Some(3),
        })
}

fn dispatch_type(graph: &Graph, node: NodeId) -> &str {
    match &graph[node].kind {
        NodeKind::ExceptionDispatch { catch_type } => catch_type,
        other => panic!("{} is {} instead of a dispatch", node, other),
    }
}

#[test]
fn nested_handlers() {
    let graph = build(&nested_try_catch(), &exceptions_pool());
    assert_ssa(&graph);

    let calls: Vec<NodeId> = find(&graph, |kind| {
        matches!(kind, NodeKind::Invoke { method, .. } if method == "Test.a()V")
    });
    assert_eq!(calls.len(), 3);
    let (outside, inner, outer) = (calls[0], calls[1], calls[2]);
    let b = invoke_of(&graph, "Test.b()V");
    let c = invoke_of(&graph, "Test.c()V");

    // Outside of every protected range: straight out of the method
    let exception = graph[outside].successor(1).unwrap();
    assert_eq!(graph[exception].kind, NodeKind::ExceptionObject);
    assert_eq!(graph[follow(&graph, exception, 0)].kind, NodeKind::Unwind);

    // Inner range: innermost handler first, then the outer one
    let exception = graph[inner].successor(1).unwrap();
    let first = graph[exception].successor(0).unwrap();
    assert_eq!(dispatch_type(&graph, first), "java/lang/ArithmeticException");
    assert_eq!(follow(&graph, first, 0), b);
    let second = graph[first].successor(1).unwrap();
    assert_eq!(dispatch_type(&graph, second), "java/lang/Exception");
    assert_eq!(follow(&graph, second, 0), c);
    assert_eq!(graph[follow(&graph, second, 1)].kind, NodeKind::Unwind);

    // Outer range only
    let exception = graph[outer].successor(1).unwrap();
    let only = graph[exception].successor(0).unwrap();
    assert_eq!(dispatch_type(&graph, only), "java/lang/Exception");
    assert_eq!(follow(&graph, only, 0), c);

    // Handlers are outside of the ranges
    for handler_call in [b, c] {
        let exception = graph[handler_call].successor(1).unwrap();
        assert_eq!(graph[follow(&graph, exception, 0)].kind, NodeKind::Unwind);
    }

    // All exceptions leaving the method meet at one unwind
    let unwinds = find(&graph, |kind| *kind == NodeKind::Unwind);
    assert_eq!(unwinds.len(), 1);
    let exception = graph[unwinds[0]].inputs[0];
    assert_eq!(graph[exception].kind, NodeKind::Phi);
}

#[test]
fn overlapping_handlers_match_in_table_order() {
    let code = vec![
        0xb8, 0x00, 0x01, // 0: invokestatic a
        0xb1, // 3: return
        0x57, // 4: pop
        0xb8, 0x00, 0x04, // 5: invokestatic b
        0xb1, // 8: return
        0x57, // 9: pop
        0xb8, 0x00, 0x05, // 10: invokestatic c
        0xb1, // 13: return
    ];
    let arithmetic = ExceptionHandler {
        start_bci: 0,
        end_bci: 3,
        handler_bci: 4,
        catch_type: Some(2),
    };
    let exception = ExceptionHandler {
        start_bci: 0,
        end_bci: 3,
        handler_bci: 9,
        catch_type: Some(3),
    };
    let pool = exceptions_pool();

    for (handlers, first_type, first_call) in [
        ([arithmetic, exception], "java/lang/ArithmeticException", "Test.b()V"),
        ([exception, arithmetic], "java/lang/Exception", "Test.c()V"),
    ] {
        let mut method = static_method("()V", 0, code.clone());
        method.exception_handlers = handlers.to_vec();
        let graph = build(&method, &pool);

        let call = invoke_of(&graph, "Test.a()V");
        let exception = graph[call].successor(1).unwrap();
        let first = graph[exception].successor(0).unwrap();
        assert_eq!(dispatch_type(&graph, first), first_type);
        assert_eq!(follow(&graph, first, 0), invoke_of(&graph, first_call));
    }
}

#[test]
fn catch_all_ends_dispatch() {
    let code = vec![
        0xb8, 0x00, 0x01, // 0: invokestatic a
        0xb1, // 3: return
        0x57, // 4: pop
        0xb8, 0x00, 0x04, // 5: invokestatic b
        0xb1, // 8: return
    ];
    let method = static_method("()V", 0, code).with_handler(ExceptionHandler {
        start_bci: 0,
        end_bci: 3,
        handler_bci: 4,
        catch_type: None,
    });
    let graph = build(&method, &exceptions_pool());

    let call = invoke_of(&graph, "Test.a()V");
    let exception = graph[call].successor(1).unwrap();
    assert_eq!(follow(&graph, exception, 0), invoke_of(&graph, "Test.b()V"));
    assert!(find(&graph, |kind| matches!(kind, NodeKind::ExceptionDispatch { .. })).is_empty());
}

#[test]
fn unresolved_catch_type_deoptimizes() {
    let method = nested_try_catch();
    let mut pool = exceptions_pool();
    pool.add_class(2, "java/lang/ArithmeticException", None);
    let graph = build(&method, &pool);

    let deopts = find(&graph, |kind| *kind == NodeKind::Deoptimize { cpi: 2 });
    assert_eq!(deopts.len(), 1);
    assert!(graph[deopts[0]].successors.iter().all(Option::is_none));

    // The handler is only reachable through the unresolved catch type
    assert!(find(&graph, |kind| {
        matches!(kind, NodeKind::Invoke { method, .. } if method == "Test.b()V")
    })
    .is_empty());
    invoke_of(&graph, "Test.c()V");
}

#[test]
fn synchronized_method_releases_lock() {
    let code = vec![
        0xb8, 0x00, 0x01, // 0: invokestatic a
        0xb1, // 3: return
    ];
    let flags = MethodAccessFlags::PUBLIC | MethodAccessFlags::SYNCHRONIZED;
    let method = MethodInfo::new("Test", "test", "()V", flags, 1, code).unwrap();
    let graph = build(&method, &exceptions_pool());

    let receiver = find(&graph, |kind| *kind == NodeKind::Parameter(0))[0];
    let enter = graph[graph.start()].successor(0).unwrap();
    assert_eq!(graph[enter].kind, NodeKind::MonitorEnter);
    assert_eq!(graph[enter].inputs, vec![receiver]);

    // Normal exit
    let call = invoke_of(&graph, "Test.a()V");
    let exit = follow(&graph, call, 0);
    assert_eq!(graph[exit].kind, NodeKind::MonitorExit);
    assert_eq!(graph[exit].inputs, vec![receiver]);
    assert_eq!(graph[follow(&graph, exit, 0)].kind, NodeKind::Return);

    // Exceptional exit
    let exception = graph[call].successor(1).unwrap();
    let exit = follow(&graph, exception, 0);
    assert_eq!(graph[exit].kind, NodeKind::MonitorExit);
    assert_eq!(graph[exit].inputs, vec![receiver]);
    let unwind = follow(&graph, exit, 0);
    assert_eq!(graph[unwind].kind, NodeKind::Unwind);
    assert_eq!(graph[unwind].inputs, vec![exception]);

    // The exit paths don't belong to any instruction
    assert_eq!(graph[enter].bci, Some(0));
    let ret = single(&graph, |kind| *kind == NodeKind::Return);
    for node in find(&graph, |kind| *kind == NodeKind::MonitorExit)
        .into_iter()
        .chain([ret, unwind])
    {
        assert_eq!(graph[node].bci, None, "{} has an offset", node);
    }
    let state = graph[exit].state_after.unwrap();
    assert!(matches!(graph[state].kind, NodeKind::FrameState { bci: EXIT_BCI, locks: 0, .. }));
    assert!(graph.to_string().contains("bci=exit"));
}

#[test]
fn table_switch() {
    let code = vec![
        0x1a, // 0: iload_0
        0xaa, 0x00, 0x00, // 1: tableswitch (padded)
        0x00, 0x00, 0x00, 0x1b, // default: 28
        0x00, 0x00, 0x00, 0x01, // low: 1
        0x00, 0x00, 0x00, 0x02, // high: 2
        0x00, 0x00, 0x00, 0x17, // 1: 24
        0x00, 0x00, 0x00, 0x19, // 2: 26
        0x04, 0xac, // 24: iconst_1; ireturn
        0x05, 0xac, // 26: iconst_2; ireturn
        0x03, 0xac, // 28: iconst_0; ireturn
    ];
    let graph = build(&static_method("(I)I", 1, code), &SimpleConstantPool::new());
    assert_ssa(&graph);

    let switches = find(&graph, |kind| matches!(kind, NodeKind::Switch(_)));
    assert_eq!(switches.len(), 1);
    assert_eq!(graph[switches[0]].kind, NodeKind::Switch(vec![1, 2]));
    assert_eq!(graph[switches[0]].successors.len(), 3);

    let phis = find(&graph, |kind| *kind == NodeKind::Phi);
    assert_eq!(phis.len(), 1);
    let expected = [
        constant(&graph, Constant::Int(1)),
        constant(&graph, Constant::Int(2)),
        constant(&graph, Constant::Int(0)),
    ];
    assert_eq!(graph[phis[0]].inputs[1..], expected);
}

#[test]
fn stack_mismatch_bails_out() {
    let code = vec![
        0x1a, // 0: iload_0
        0x99, 0x00, 0x06, // 1: ifeq 7
        0x04, // 4: iconst_1
        0x00, // 5: nop
        0x00, // 6: nop
        0xb1, // 7: return
    ];
    let result = build_graph(
        &static_method("(I)V", 1, code),
        &SimpleConstantPool::new(),
        &Settings::new(),
    );
    assert!(matches!(result, Err(Bailout::IncompatibleFrames { bci: 7, .. })));
}

#[test]
fn other_bailouts() {
    let pool = SimpleConstantPool::new();
    let settings = Settings::new();

    // jsr 4; return; return
    let method = static_method("()V", 0, vec![0xa8, 0x00, 0x04, 0xb1, 0xb1]);
    assert!(matches!(
        build_graph(&method, &pool, &settings),
        Err(Bailout::Subroutine { bci: 0 })
    ));

    // reserved opcode
    let method = static_method("()V", 0, vec![0xca]);
    assert!(matches!(
        build_graph(&method, &pool, &settings),
        Err(Bailout::UnsupportedOpcode { opcode: 0xca, .. })
    ));

    // ldc #9 with nothing in the pool
    let method = static_method("()V", 0, vec![0x12, 0x09, 0x57, 0xb1]);
    assert!(matches!(
        build_graph(&method, &pool, &settings),
        Err(Bailout::InvalidConstant { bci: 0, cpi: 9 })
    ));

    // new of an unresolved class
    let mut unresolved = SimpleConstantPool::new();
    unresolved.add_class(2, "Missing", None);
    let method = static_method("()V", 0, vec![0xbb, 0x00, 0x02, 0x57, 0xb1]);
    assert!(matches!(
        build_graph(&method, &unresolved, &settings),
        Err(Bailout::UnresolvedMandatory { bci: 0, cpi: 2 })
    ));

    // pop on an empty stack
    let method = static_method("()V", 0, vec![0x00, 0x57, 0xb1]);
    assert!(matches!(
        build_graph(&method, &pool, &settings),
        Err(Bailout::InvalidFrame { bci: Some(1), .. })
    ));

    let method = static_method("()V", 0, vec![]);
    assert!(matches!(
        build_graph(&method, &pool, &settings),
        Err(Bailout::NoCode)
    ));
}

#[test]
fn node_budget() {
    let mut code = vec![];
    for value in 1..=20u8 {
        code.extend([0x10, value, 0x57]); // bipush value; pop
    }
    code.push(0xb1);
    let method = static_method("()V", 0, code);
    let pool = SimpleConstantPool::new();

    let settings = Settings {
        max_graph_nodes: 8,
        ..Settings::new()
    };
    assert!(matches!(
        build_graph(&method, &pool, &settings),
        Err(Bailout::NodeBudgetExceeded { limit: 8 })
    ));
    assert!(build_graph(&method, &pool, &Settings::new()).is_ok());
}

#[test]
fn deterministic() {
    let pool = exceptions_pool();
    let first = build(&nested_try_catch(), &pool).to_string();
    let second = build(&nested_try_catch(), &pool).to_string();
    assert_eq!(first, second);

    let loop_code = vec![
        0x03, 0x3c, 0x1b, 0x1a, 0xa2, 0x00, 0x09, 0x84, 0x01, 0x01, 0xa7, 0xff, 0xf8, 0x1b, 0xac,
    ];
    let method = static_method("(I)I", 2, loop_code);
    let pool = SimpleConstantPool::new();
    assert_eq!(build(&method, &pool).to_string(), build(&method, &pool).to_string());
}

#[test]
fn dead_code_elimination_is_idempotent() {
    let settings = Settings {
        eliminate_dead_code: false,
        ..Settings::new()
    };
    let pool = exceptions_pool();
    for method in [nested_try_catch(), diamond(0x04, 0x05)] {
        let mut graph = build_graph(&method, &pool, &settings).unwrap();
        eliminate_dead_code(&mut graph);
        let after_first = graph.to_string();
        assert_eq!(eliminate_dead_code(&mut graph).total(), 0);
        assert_eq!(graph.to_string(), after_first);
    }
}

#[test]
fn unresolved_field_deoptimizes() {
    let mut pool = SimpleConstantPool::new();
    pool.add_field(3, FieldRef::new("Foo", "x", "I").unwrap(), None);
    let code = vec![
        0xb2, 0x00, 0x03, // 0: getstatic Foo.x
        0xac, // 3: ireturn
    ];
    let graph = build(&static_method("()I", 0, code), &pool);

    let deopts = find(&graph, |kind| *kind == NodeKind::Deoptimize { cpi: 3 });
    assert_eq!(deopts.len(), 1);
    assert_eq!(graph[graph.start()].successor(0), Some(deopts[0]));
    assert!(find(&graph, |kind| matches!(kind, NodeKind::LoadField { .. })).is_empty());

    let zero = constant(&graph, Constant::Int(0));
    let ret = follow(&graph, deopts[0], 0);
    assert_eq!(graph[ret].kind, NodeKind::Return);
    assert_eq!(graph[ret].inputs, vec![zero]);
}

fn invoke_kind(graph: &Graph, node: NodeId) -> InvokeKind {
    match &graph[node].kind {
        NodeKind::Invoke { kind, .. } => *kind,
        other => panic!("{} is {} instead of an invoke", node, other),
    }
}

#[test]
fn devirtualize_final_method() {
    // void test(Bar bar) { bar.run(); }
    let code = vec![
        0x2b, // 0: aload_1
        0xb6, 0x00, 0x01, // 1: invokevirtual Bar.run
        0xb1, // 4: return
    ];
    let method = MethodInfo::new("Test", "test", "(LBar;)V", MethodAccessFlags::PUBLIC, 2, code)
        .unwrap();

    for (flags, expected) in [
        (MethodAccessFlags::PUBLIC | MethodAccessFlags::FINAL, InvokeKind::Special),
        (MethodAccessFlags::PUBLIC, InvokeKind::Virtual),
    ] {
        let mut pool = SimpleConstantPool::new();
        let method_ref = MethodRef::new("Bar", "run", "()V").unwrap();
        pool.add_method(1, method_ref, Some(resolved("Bar", "run", "()V", flags)));
        let graph = build(&method, &pool);
        assert_eq!(invoke_kind(&graph, invoke_of(&graph, "Bar.run()V")), expected);
    }
}

#[test]
fn devirtualize_exact_receiver() {
    // new Sub().run(), where `run` is declared in Base and overridden in Sub
    let code = vec![
        0xbb, 0x00, 0x02, // 0: new Sub
        0xb6, 0x00, 0x01, // 3: invokevirtual Base.run
        0xb1, // 6: return
    ];
    let method = static_method("()V", 0, code);
    let mut pool = SimpleConstantPool::new();
    let flags = MethodAccessFlags::PUBLIC;
    pool.add_class(2, "Sub", Some(ClassAccessFlags::PUBLIC));
    pool.add_method(
        1,
        MethodRef::new("Base", "run", "()V").unwrap(),
        Some(resolved("Base", "run", "()V", flags)),
    );
    pool.add_implementation("Sub", 1, resolved("Sub", "run", "()V", flags));

    let graph = build(&method, &pool);
    let call = invoke_of(&graph, "Sub.run()V");
    assert_eq!(invoke_kind(&graph, call), InvokeKind::Special);
    let allocation = find(&graph, |kind| matches!(kind, NodeKind::NewInstance { .. }))[0];
    assert_eq!(graph[call].inputs, vec![allocation]);

    let settings = Settings {
        devirtualize: false,
        ..Settings::new()
    };
    let graph = build_graph(&method, &pool, &settings).unwrap();
    let call = invoke_of(&graph, "Base.run()V");
    assert_eq!(invoke_kind(&graph, call), InvokeKind::Virtual);
}

#[test]
fn synchronized_block() {
    // void test() { synchronized (this) { a(); } }, as javac lays it out: the handler covers
    // its own monitorexit
    let code = vec![
        0x2a, // 0: aload_0
        0x59, // 1: dup
        0x4c, // 2: astore_1
        0xc2, // 3: monitorenter
        0xb8, 0x00, 0x01, // 4: invokestatic a
        0x2b, // 7: aload_1
        0xc3, // 8: monitorexit
        0xa7, 0x00, 0x08, // 9: goto 17
        0x4d, // 12: astore_2
        0x2b, // 13: aload_1
        0xc3, // 14: monitorexit
        0x2c, // 15: aload_2
        0xbf, // 16: athrow
        0xb1, // 17: return
    ];
    let method = MethodInfo::new("Test", "test", "()V", MethodAccessFlags::PUBLIC, 3, code)
        .unwrap()
        .with_handler(ExceptionHandler {
            start_bci: 4,
            end_bci: 9,
            handler_bci: 12,
            catch_type: None,
        })
        .with_handler(ExceptionHandler {
            start_bci: 12,
            end_bci: 15,
            handler_bci: 12,
            catch_type: None,
        });
    let graph = build(&method, &exceptions_pool());
    assert_ssa(&graph);
    let receiver = parameter(&graph, 0);

    let enter = single(&graph, |kind| *kind == NodeKind::MonitorEnter);
    assert_eq!(graph[enter].inputs, vec![receiver]);
    let state = graph[enter].state_after.unwrap();
    assert!(matches!(graph[state].kind, NodeKind::FrameState { locks: 1, .. }));

    // Every monitorexit releases the receiver, even the one repeated by the handler loop
    let exits = find(&graph, |kind| *kind == NodeKind::MonitorExit);
    assert_eq!(exits.len(), 2);
    for exit in &exits {
        assert_eq!(graph[*exit].inputs, vec![receiver]);
        let state = graph[*exit].state_after.unwrap();
        assert!(matches!(graph[state].kind, NodeKind::FrameState { locks: 0, .. }));
    }
    let call = invoke_of(&graph, "Test.a()V");
    assert_eq!(graph[call].successor(0), Some(exits[0]));
    assert_eq!(graph[follow(&graph, exits[0], 0)].kind, NodeKind::Return);

    // The handler is a loop: its own monitorexit throws back into it
    let begin = single(&graph, |kind| *kind == NodeKind::LoopBegin);
    let end = single(&graph, |kind| *kind == NodeKind::LoopEnd);
    let handler_exception = graph[exits[1]].successor(1).unwrap();
    assert_eq!(graph[handler_exception].kind, NodeKind::ExceptionObject);
    assert_eq!(graph[handler_exception].successor(0), Some(end));
    assert_eq!(graph[end].successor(0), Some(begin));

    let predecessors = &graph[begin].predecessors;
    assert_eq!(predecessors.len(), 3);
    assert_eq!(predecessors[2], end);
    assert_eq!(predecessors[0], graph[call].successor(1).unwrap());
    assert_eq!(predecessors[1], graph[exits[0]].successor(1).unwrap());

    // Only the caught exception differs between the entries of the handler
    let phis = graph.phis(begin);
    assert_eq!(phis.len(), 1);
    assert_eq!(graph[phis[0]].inputs[1..], [predecessors[0], predecessors[1], handler_exception]);

    // The rethrow leaves through the same unwind as a failing monitorenter
    let unwind = single(&graph, |kind| *kind == NodeKind::Unwind);
    let thrown = graph[unwind].inputs[0];
    assert_eq!(graph[thrown].kind, NodeKind::Phi);
    assert_eq!(graph[thrown].inputs[1], graph[enter].successor(1).unwrap());
    assert_eq!(graph[thrown].inputs[2], phis[0]);
}

#[test]
fn array_accesses() {
    // static int test(int[] a, int i) { a[i] = a[i]; return a.length; }
    let code = vec![
        0x2a, // 0: aload_0
        0x1b, // 1: iload_1
        0x2a, // 2: aload_0
        0x1b, // 3: iload_1
        0x2e, // 4: iaload
        0x4f, // 5: iastore
        0x2a, // 6: aload_0
        0xbe, // 7: arraylength
        0xac, // 8: ireturn
    ];
    let graph = build(&static_method("([II)I", 2, code), &SimpleConstantPool::new());
    let (array, index) = (parameter(&graph, 0), parameter(&graph, 1));
    let int = ElementType::Base(BaseType::Int);

    let load = follow(&graph, graph.start(), 0);
    assert_eq!(graph[load].kind, NodeKind::LoadIndexed(int));
    assert_eq!(graph[load].inputs, vec![array, index]);
    assert_eq!(graph[load].value_kind, ValueKind::Int);
    assert!(graph[load].state_after.is_none());

    let store = follow(&graph, load, 0);
    assert_eq!(graph[store].kind, NodeKind::StoreIndexed(int));
    assert_eq!(graph[store].inputs, vec![array, index, load]);
    assert!(graph[store].state_after.is_some());

    let length = follow(&graph, store, 0);
    assert_eq!(graph[length].kind, NodeKind::ArrayLength);
    assert_eq!(graph[length].inputs, vec![array]);

    // No handlers, so nothing gets an exception edge
    for node in [load, store, length] {
        assert_eq!(graph[node].successors.len(), 1);
    }
    let ret = follow(&graph, length, 0);
    assert_eq!(graph[ret].inputs, vec![length]);

    // static long test(long[] a) { return a[0]; }
    let code = vec![0x2a, 0x03, 0x2f, 0xad]; // aload_0; iconst_0; laload; lreturn
    let graph = build(&static_method("([J)J", 1, code), &SimpleConstantPool::new());
    let load = single(&graph, |kind| matches!(kind, NodeKind::LoadIndexed(_)));
    assert_eq!(graph[load].kind, NodeKind::LoadIndexed(ElementType::Base(BaseType::Long)));
    assert_eq!(graph[load].value_kind, ValueKind::Long);
}

#[test]
fn resolved_fields() {
    let mut pool = SimpleConstantPool::new();
    let public = || {
        Some(ResolvedField {
            access_flags: FieldAccessFlags::PUBLIC,
        })
    };
    pool.add_field(3, FieldRef::new("Foo", "x", "I").unwrap(), public());
    pool.add_field(4, FieldRef::new("Foo", "count", "J").unwrap(), public());

    // static void test(Foo foo) { foo.x = foo.x + 1; Foo.count = Foo.count; }
    let code = vec![
        0x2a, // 0: aload_0
        0x2a, // 1: aload_0
        0xb4, 0x00, 0x03, // 2: getfield Foo.x
        0x04, // 5: iconst_1
        0x60, // 6: iadd
        0xb5, 0x00, 0x03, // 7: putfield Foo.x
        0xb2, 0x00, 0x04, // 10: getstatic Foo.count
        0xb3, 0x00, 0x04, // 13: putstatic Foo.count
        0xb1, // 16: return
    ];
    let graph = build(&static_method("(LFoo;)V", 1, code), &pool);
    let foo = parameter(&graph, 0);

    let get = follow(&graph, graph.start(), 0);
    let field = String::from("Foo.x");
    assert_eq!(
        graph[get].kind,
        NodeKind::LoadField {
            field: field.clone(),
            is_static: false
        }
    );
    assert_eq!(graph[get].inputs, vec![foo]);

    let put = follow(&graph, get, 0);
    assert_eq!(
        graph[put].kind,
        NodeKind::StoreField {
            field,
            is_static: false
        }
    );
    let sum = graph[put].inputs[1];
    assert_eq!(graph[put].inputs[0], foo);
    assert_eq!(graph[sum].kind, NodeKind::Arithmetic(ArithOp::Add));
    assert_eq!(graph[sum].inputs, vec![get, constant(&graph, Constant::Int(1))]);
    assert!(graph[put].state_after.is_some());

    let get_static = follow(&graph, put, 0);
    let field = String::from("Foo.count");
    assert_eq!(
        graph[get_static].kind,
        NodeKind::LoadField {
            field: field.clone(),
            is_static: true
        }
    );
    assert!(graph[get_static].inputs.is_empty());
    assert_eq!(graph[get_static].value_kind, ValueKind::Long);

    let put_static = follow(&graph, get_static, 0);
    assert_eq!(
        graph[put_static].kind,
        NodeKind::StoreField {
            field,
            is_static: true
        }
    );
    assert_eq!(graph[put_static].inputs, vec![get_static]);
    assert_eq!(graph[follow(&graph, put_static, 0)].kind, NodeKind::Return);
}

#[test]
fn invoke_dynamic_call_site() {
    let mut pool = SimpleConstantPool::new();
    pool.add_invoke_dynamic(
        7,
        InvokeDynamicRef {
            name: String::from("run"),
            descriptor: MethodDescriptor::parse("(I)Ljava/lang/Runnable;").unwrap(),
        },
    );
    let code = vec![
        0x1a, // 0: iload_0
        0xba, 0x00, 0x07, 0x00, 0x00, // 1: invokedynamic run
        0xb0, // 6: areturn
    ];
    let graph = build(&static_method("(I)Ljava/lang/Runnable;", 1, code), &pool);

    let call = invoke_of(&graph, "run(I)Ljava/lang/Runnable;");
    assert_eq!(invoke_kind(&graph, call), InvokeKind::Dynamic);
    assert_eq!(graph[call].inputs, vec![parameter(&graph, 0)]);
    assert_eq!(graph[call].value_kind, ValueKind::Object);
    assert!(graph[call].state_after.is_some());
    assert_eq!(graph[follow(&graph, call, 0)].inputs, vec![call]);

    // The call site must be in the pool
    let code = vec![0xba, 0x00, 0x08, 0x00, 0x00, 0xb1];
    assert!(matches!(
        build_graph(&static_method("()V", 0, code), &pool, &Settings::new()),
        Err(Bailout::InvalidConstant { bci: 0, cpi: 8 })
    ));
}

#[test]
fn type_checks() {
    // static void test(Object o) { if (o instanceof Sub) ((Sub) o).run(); }
    let code = vec![
        0x2a, // 0: aload_0
        0xc1, 0x00, 0x02, // 1: instanceof Sub
        0x99, 0x00, 0x0b, // 4: ifeq 15
        0x2a, // 7: aload_0
        0xc0, 0x00, 0x02, // 8: checkcast Sub
        0xb6, 0x00, 0x01, // 11: invokevirtual Base.run
        0xb1, // 14: return
        0xb1, // 15: return
    ];
    let method = static_method("(Ljava/lang/Object;)V", 1, code);
    let flags = MethodAccessFlags::PUBLIC;

    // A cast to a final class pins down the receiver, an open class does not
    for (class_flags, expected) in [
        (ClassAccessFlags::PUBLIC | ClassAccessFlags::FINAL, "Sub.run()V"),
        (ClassAccessFlags::PUBLIC, "Base.run()V"),
    ] {
        let mut pool = SimpleConstantPool::new();
        pool.add_class(2, "Sub", Some(class_flags));
        pool.add_method(
            1,
            MethodRef::new("Base", "run", "()V").unwrap(),
            Some(resolved("Base", "run", "()V", flags)),
        );
        pool.add_implementation("Sub", 1, resolved("Sub", "run", "()V", flags));
        let graph = build(&method, &pool);
        let object = parameter(&graph, 0);
        let class = String::from("Sub");

        let test = single(&graph, |kind| matches!(kind, NodeKind::InstanceOf { .. }));
        assert_eq!(graph[test].kind, NodeKind::InstanceOf { class: class.clone() });
        assert_eq!(graph[test].inputs, vec![object]);
        assert_eq!(graph[test].value_kind, ValueKind::Int);
        assert!(graph[test].successors.is_empty());

        let branch = single(&graph, |kind| matches!(kind, NodeKind::If(_)));
        assert_eq!(graph[branch].kind, NodeKind::If(Condition::Int(OrdComparison::EQ)));
        assert_eq!(graph[branch].inputs, vec![test, constant(&graph, Constant::Int(0))]);

        let cast = follow(&graph, branch, 1);
        assert_eq!(graph[cast].kind, NodeKind::CheckCast { class });
        assert_eq!(graph[cast].inputs, vec![object]);

        let call = invoke_of(&graph, expected);
        assert_eq!(graph[cast].successor(0), Some(call));
        assert_eq!(graph[call].inputs, vec![cast]);
        let expected_kind = if expected == "Sub.run()V" {
            InvokeKind::Special
        } else {
            InvokeKind::Virtual
        };
        assert_eq!(invoke_kind(&graph, call), expected_kind);
    }
}

#[test]
fn array_allocations() {
    let code = vec![
        0x1a, // 0: iload_0
        0xbc, 0x0a, // 1: newarray int
        0x57, // 3: pop
        0x1a, // 4: iload_0
        0xbd, 0x00, 0x02, // 5: anewarray java/lang/String
        0xbe, // 8: arraylength
        0x57, // 9: pop
        0x1a, // 10: iload_0
        0x05, // 11: iconst_2
        0xc5, 0x00, 0x03, 0x02, // 12: multianewarray [[I 2
        0x57, // 16: pop
        0xb1, // 17: return
    ];
    let mut pool = SimpleConstantPool::new();
    pool.add_class(2, "java/lang/String", Some(ClassAccessFlags::PUBLIC));
    pool.add_class(3, "[[I", Some(ClassAccessFlags::PUBLIC));
    let graph = build(&static_method("(I)V", 1, code), &pool);
    let length = parameter(&graph, 0);

    let ints = follow(&graph, graph.start(), 0);
    assert_eq!(graph[ints].kind, NodeKind::NewArray(BaseType::Int));
    assert_eq!(graph[ints].inputs, vec![length]);
    assert!(graph[ints].state_after.is_some());

    let strings = follow(&graph, ints, 0);
    assert_eq!(
        graph[strings].kind,
        NodeKind::NewObjectArray {
            class: String::from("java/lang/String")
        }
    );
    assert_eq!(graph[strings].inputs, vec![length]);

    let strings_length = follow(&graph, strings, 0);
    assert_eq!(graph[strings_length].kind, NodeKind::ArrayLength);
    assert_eq!(graph[strings_length].inputs, vec![strings]);

    let matrix = follow(&graph, strings_length, 0);
    assert_eq!(
        graph[matrix].kind,
        NodeKind::NewMultiArray {
            class: String::from("[[I")
        }
    );
    assert_eq!(graph[matrix].inputs, vec![length, constant(&graph, Constant::Int(2))]);
    assert_eq!(graph[follow(&graph, matrix, 0)].kind, NodeKind::Return);
}

#[test]
fn comparisons_shifts_and_conversions() {
    // static int test(long a, float b, int c)
    //   { return lcmp(a, 1L) + fcmpg(b, 0f) + (c << 2) + (byte) (int) (a >>> c); }
    let code = vec![
        0x1e, // 0: lload_0
        0x0a, // 1: lconst_1
        0x94, // 2: lcmp
        0x24, // 3: fload_2
        0x0b, // 4: fconst_0
        0x96, // 5: fcmpg
        0x60, // 6: iadd
        0x1d, // 7: iload_3
        0x05, // 8: iconst_2
        0x78, // 9: ishl
        0x60, // 10: iadd
        0x1e, // 11: lload_0
        0x1d, // 12: iload_3
        0x7d, // 13: lushr
        0x88, // 14: l2i
        0x91, // 15: i2b
        0x60, // 16: iadd
        0xac, // 17: ireturn
    ];
    let graph = build(&static_method("(JFI)I", 4, code), &SimpleConstantPool::new());
    let (a, b, c) = (parameter(&graph, 0), parameter(&graph, 2), parameter(&graph, 3));
    assert_eq!(graph[a].value_kind, ValueKind::Long);
    assert_eq!(graph[b].value_kind, ValueKind::Float);

    let lcmp = single(&graph, |kind| *kind == NodeKind::Compare(None));
    assert_eq!(graph[lcmp].inputs, vec![a, constant(&graph, Constant::Long(1))]);
    assert_eq!(graph[lcmp].value_kind, ValueKind::Int);
    let fcmp = single(&graph, |kind| *kind == NodeKind::Compare(Some(CompareMode::G)));
    assert_eq!(graph[fcmp].inputs, vec![b, constant(&graph, Constant::float(0.0))]);

    let shl = single(&graph, |kind| *kind == NodeKind::Shift(ShiftType::Left));
    assert_eq!(graph[shl].inputs, vec![c, constant(&graph, Constant::Int(2))]);
    assert_eq!(graph[shl].value_kind, ValueKind::Int);
    let ushr = single(&graph, |kind| *kind == NodeKind::Shift(ShiftType::LogicalRight));
    assert_eq!(graph[ushr].inputs, vec![a, c]);
    assert_eq!(graph[ushr].value_kind, ValueKind::Long);

    let l2i = single(&graph, |kind| *kind == NodeKind::Convert(ConvertOp::L2I));
    assert_eq!(graph[l2i].inputs, vec![ushr]);
    assert_eq!(graph[l2i].value_kind, ValueKind::Int);
    let i2b = single(&graph, |kind| *kind == NodeKind::Convert(ConvertOp::I2B));
    assert_eq!(graph[i2b].inputs, vec![l2i]);

    let ret = single(&graph, |kind| *kind == NodeKind::Return);
    let total = graph[ret].inputs[0];
    assert_eq!(graph[total].inputs[1], i2b);
    let partial = graph[total].inputs[0];
    assert_eq!(graph[partial].inputs[1], shl);
    let first = graph[partial].inputs[0];
    assert_eq!(graph[first].inputs, vec![lcmp, fcmp]);

    // Floating nodes stay out of the control flow
    assert_eq!(graph[graph.start()].successor(0), Some(ret));
}

#[test]
fn stack_shuffles() {
    // lload_0; dup2; ladd; iload_2; dup_x2; pop; dup2_x1; pop2; i2l; lsub; lreturn
    let code = vec![0x1e, 0x5c, 0x61, 0x1c, 0x5b, 0x57, 0x5d, 0x58, 0x85, 0x65, 0xad];
    let graph = build(&static_method("(JI)J", 3, code), &SimpleConstantPool::new());
    let (a, b) = (parameter(&graph, 0), parameter(&graph, 2));

    let ret = single(&graph, |kind| *kind == NodeKind::Return);
    let difference = graph[ret].inputs[0];
    assert_eq!(graph[difference].kind, NodeKind::Arithmetic(ArithOp::Sub));
    let (double, widened) = (graph[difference].inputs[0], graph[difference].inputs[1]);
    assert_eq!(graph[double].kind, NodeKind::Arithmetic(ArithOp::Add));
    assert_eq!(graph[double].inputs, vec![a, a]);
    assert_eq!(graph[widened].kind, NodeKind::Convert(ConvertOp::I2L));
    assert_eq!(graph[widened].inputs, vec![b]);

    // iload_0; iload_1; swap; isub; ireturn
    let code = vec![0x1a, 0x1b, 0x5f, 0x64, 0xac];
    let graph = build(&static_method("(II)I", 2, code), &SimpleConstantPool::new());
    let difference = single(&graph, |kind| *kind == NodeKind::Arithmetic(ArithOp::Sub));
    assert_eq!(graph[difference].inputs, vec![parameter(&graph, 1), parameter(&graph, 0)]);
}

#[test]
fn division_by_zero_is_caught() {
    // static int test(int a, int b) {
    //   try { return a / b; } catch (ArithmeticException e) { return 0; }
    // }
    let code = vec![
        0x1a, // 0: iload_0
        0x1b, // 1: iload_1
        0x6c, // 2: idiv
        0xac, // 3: ireturn
        0x57, // 4: pop
        0x03, // 5: iconst_0
        0xac, // 6: ireturn
    ];
    let method = static_method("(II)I", 2, code).with_handler(ExceptionHandler {
        start_bci: 0,
        end_bci: 3,
        handler_bci: 4,
        catch_type: Some(2),
    });
    let graph = build(&method, &exceptions_pool());
    assert_ssa(&graph);

    let division = single(&graph, |kind| *kind == NodeKind::IntegerDivRem(ArithOp::Div));
    assert_eq!(graph[division].inputs, vec![parameter(&graph, 0), parameter(&graph, 1)]);
    assert_eq!(graph[division].successors.len(), 2);

    let exception = graph[division].successor(1).unwrap();
    assert_eq!(graph[exception].kind, NodeKind::ExceptionObject);
    let dispatch = graph[exception].successor(0).unwrap();
    assert_eq!(dispatch_type(&graph, dispatch), "java/lang/ArithmeticException");
    assert_eq!(graph[follow(&graph, dispatch, 1)].kind, NodeKind::Unwind);

    // Both the quotient and the handler's zero reach the return
    let ret = follow(&graph, dispatch, 0);
    assert_eq!(graph[ret].kind, NodeKind::Return);
    assert_eq!(follow(&graph, division, 0), ret);
    let result = graph[ret].inputs[0];
    assert_eq!(graph[result].kind, NodeKind::Phi);
    let mut values = graph[result].inputs[1..].to_vec();
    values.sort();
    let mut expected = vec![division, constant(&graph, Constant::Int(0))];
    expected.sort();
    assert_eq!(values, expected);

    // Without handlers the exception just propagates
    let code = vec![0x1e, 0x20, 0x71, 0xad]; // lload_0; lload_2; lrem; lreturn
    let graph = build(&static_method("(JJ)J", 4, code), &SimpleConstantPool::new());
    let remainder = single(&graph, |kind| *kind == NodeKind::IntegerDivRem(ArithOp::Rem));
    assert_eq!(graph[remainder].value_kind, ValueKind::Long);
    assert_eq!(graph[remainder].successors.len(), 1);
}

#[test]
fn wide_values_across_merges() {
    // if (c != 0) { push a + 1; slot 1 = 5 (an int over the first half of `a`) } else push 0L;
    // return the pushed long
    let code = vec![
        0x1a, // 0: iload_0
        0x99, 0x00, 0x0b, // 1: ifeq 12
        0x1f, // 4: lload_1
        0x0a, // 5: lconst_1
        0x61, // 6: ladd
        0x08, // 7: iconst_5
        0x3c, // 8: istore_1
        0xa7, 0x00, 0x04, // 9: goto 13
        0x09, // 12: lconst_0
        0xad, // 13: lreturn
    ];
    let graph = build(&static_method("(IJ)J", 3, code), &SimpleConstantPool::new());
    assert_ssa(&graph);
    let a = parameter(&graph, 1);
    assert_eq!(graph[a].value_kind, ValueKind::Long);

    let phi = single(&graph, |kind| *kind == NodeKind::Phi);
    assert_eq!(graph[phi].value_kind, ValueKind::Long);
    let sum = single(&graph, |kind| *kind == NodeKind::Arithmetic(ArithOp::Add));
    assert_eq!(graph[sum].inputs, vec![a, constant(&graph, Constant::Long(1))]);

    let branch = single(&graph, |kind| matches!(kind, NodeKind::If(_)));
    let (merge, taken) = entry_edge(&graph, branch, 0);
    let (_, fallthrough) = entry_edge(&graph, branch, 1);
    assert_eq!(graph[phi].inputs[1 + taken], constant(&graph, Constant::Long(0)));
    assert_eq!(graph[phi].inputs[1 + fallthrough], sum);

    // The long local disagrees with the int stored over it, so the merge drops it
    let state = graph[merge].state_after.unwrap();
    match &graph[state].kind {
        NodeKind::FrameState {
            present, locals, ..
        } => {
            assert_eq!(*locals, 3);
            assert_eq!(*present, vec![true, false, false, true]);
        }
        other => panic!("{} is not a frame state", other),
    }
    assert_eq!(graph[state].inputs, vec![parameter(&graph, 0), phi]);
    assert_eq!(graph[follow(&graph, merge, 0)].inputs, vec![phi]);
}

#[test]
fn nested_loops() {
    // static int test(int n) {
    //   int s = 0;
    //   for (int i = 0; i < n; i++) for (int j = 0; j < i; j++) s++;
    //   return s;
    // }
    let code = vec![
        0x03, // 0: iconst_0
        0x3e, // 1: istore_3
        0x03, // 2: iconst_0
        0x3c, // 3: istore_1
        0x1b, // 4: iload_1
        0x1a, // 5: iload_0
        0xa2, 0x00, 0x19, // 6: if_icmpge 31
        0x03, // 9: iconst_0
        0x3d, // 10: istore_2
        0x1c, // 11: iload_2
        0x1b, // 12: iload_1
        0xa2, 0x00, 0x0c, // 13: if_icmpge 25
        0x84, 0x03, 0x01, // 16: iinc 3 1
        0x84, 0x02, 0x01, // 19: iinc 2 1
        0xa7, 0xff, 0xf5, // 22: goto 11
        0x84, 0x01, 0x01, // 25: iinc 1 1
        0xa7, 0xff, 0xe8, // 28: goto 4
        0x1d, // 31: iload_3
        0xac, // 32: ireturn
    ];
    let graph = build(&static_method("(I)I", 4, code), &SimpleConstantPool::new());
    assert_ssa(&graph);
    let n = parameter(&graph, 0);
    let zero = constant(&graph, Constant::Int(0));
    let one = constant(&graph, Constant::Int(1));

    let begins = find(&graph, |kind| *kind == NodeKind::LoopBegin);
    assert_eq!(begins.len(), 2);
    assert_eq!(find(&graph, |kind| *kind == NodeKind::LoopEnd).len(), 2);
    let (outer, inner) = if graph[begins[0]].predecessors[0] == graph.start() {
        (begins[0], begins[1])
    } else {
        (begins[1], begins[0])
    };
    for begin in [outer, inner] {
        let preds = &graph[begin].predecessors;
        assert_eq!(preds.len(), 2);
        assert_eq!(graph[preds[1]].kind, NodeKind::LoopEnd);
        assert_eq!(graph[preds[1]].successor(0), Some(begin));
    }

    // `n` never changes, `i` only changes in the outer loop
    let outer_test = graph[outer].successor(0).unwrap();
    let i = graph[outer_test].inputs[0];
    assert_eq!(graph[outer_test].inputs[1], n);
    assert!(graph[i].is_phi_of(outer));
    assert_eq!(graph[i].inputs[1], zero);
    let next_i = graph[i].inputs[2];
    assert_eq!(graph[next_i].inputs, vec![i, one]);

    let inner_test = graph[inner].successor(0).unwrap();
    assert_eq!(graph[inner].predecessors[0], outer_test);
    let j = graph[inner_test].inputs[0];
    assert!(graph[j].is_phi_of(inner));
    assert_eq!(graph[inner_test].inputs[1], i);

    // `s` gets a phi in each loop, feeding each other
    assert_eq!(graph.phis(outer).len(), 2);
    assert_eq!(graph.phis(inner).len(), 2);
    let ret = single(&graph, |kind| *kind == NodeKind::Return);
    let outer_s = graph[ret].inputs[0];
    assert!(graph[outer_s].is_phi_of(outer));
    assert_eq!(graph[outer_s].inputs[1], zero);
    let inner_s = graph[outer_s].inputs[2];
    assert!(graph[inner_s].is_phi_of(inner));
    assert_eq!(graph[inner_s].inputs[1], outer_s);
    let next_s = graph[inner_s].inputs[2];
    assert_eq!(graph[next_s].inputs, vec![inner_s, one]);
}
