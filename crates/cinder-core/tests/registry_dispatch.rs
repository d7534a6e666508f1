//! Registry lookups and implementation creation through the public API

use cinder_core::cpu;
use cinder_core::device::{self, RangeDeviceImpl};
use cinder_core::{
    register_implementations, BackendKind, Error, ExecutionPlan, ImplFactory, ImplementationMap, Network,
    PrimitiveInst, PrimitiveKind, Result, ShapeMode,
};
use cinder_runtime::{read_typed, AllocationType, DataType, Engine, Event, Format, Layout, Shape};
use std::sync::Arc;

fn network() -> Result<(Arc<Engine>, Arc<Network>)> {
    cinder_tracing::init_test_tracing();
    let engine = Arc::new(Engine::default());
    let network = Arc::new(Network::new(Arc::clone(&engine))?);
    Ok((engine, network))
}

fn range_instance(
    engine: &Engine,
    network: &Arc<Network>,
    id: &str,
    start: f32,
    output: Layout,
) -> Result<PrimitiveInst> {
    let start = engine.attach_host(Layout::scalar(DataType::F32, Format::Bfyx), &[start], network.stream())?;
    let output = engine.allocate(output)?;
    Ok(PrimitiveInst::new(id, PrimitiveKind::RANGE, Arc::clone(network), vec![start], output))
}

// ============================================================================
// Lookup
// ============================================================================

#[test]
fn test_registered_pairs_round_trip() -> Result<()> {
    let mut map = ImplementationMap::new();
    let factory: ImplFactory = Arc::new(cpu::range::create);
    map.register(
        PrimitiveKind::RANGE,
        BackendKind::Cpu,
        ShapeMode::Static,
        factory,
        &[DataType::F32, DataType::I32],
        &[Format::Bfyx, Format::Bfzyx],
    );

    for data_type in [DataType::F32, DataType::I32] {
        for format in [Format::Bfyx, Format::Bfzyx] {
            map.lookup(PrimitiveKind::RANGE, BackendKind::Cpu, ShapeMode::Static, data_type, format)?;
        }
    }

    let miss = map.lookup(PrimitiveKind::RANGE, BackendKind::Cpu, ShapeMode::Static, DataType::F32, Format::Byxf);
    assert!(matches!(miss, Err(Error::ImplementationNotFound { key }) if key.format == Format::Byxf));

    let other_shape = map.lookup(PrimitiveKind::RANGE, BackendKind::Cpu, ShapeMode::Dynamic, DataType::F32, Format::Bfyx);
    assert!(other_shape.is_err());
    Ok(())
}

#[test]
fn test_builtin_registration_covers_both_backends() {
    let mut map = ImplementationMap::new();
    register_implementations(&mut map);

    let cpu_entries = 2 * cpu::range::TYPES.len() * cpu::range::FORMATS.len();
    let device_entries = 2 * device::range::TYPES.len() * device::range::FORMATS.len();
    assert_eq!(map.len(), cpu_entries + device_entries);
    assert_eq!(map.entries_for(PrimitiveKind::RANGE).len(), map.len());

    let device_only = map
        .entries_for(PrimitiveKind::RANGE)
        .into_iter()
        .filter(|key| key.backend == BackendKind::Device)
        .count();
    assert_eq!(device_only, device_entries);
}

#[test]
fn test_unregistered_kind_is_not_found() {
    let map = ImplementationMap::with_builtins();
    let err = map
        .lookup(
            PrimitiveKind::custom("gather"),
            BackendKind::Cpu,
            ShapeMode::Static,
            DataType::F32,
            Format::Bfyx,
        )
        .err()
        .map(|err| err.to_string());
    assert_eq!(
        err.as_deref(),
        Some("no implementation registered for gather/cpu/static/f32/bfyx")
    );
}

// ============================================================================
// Creation
// ============================================================================

#[test]
fn test_create_keys_on_output_layout() -> Result<()> {
    let (engine, network) = network()?;
    let registry = cinder_core::registry::global();

    let inst = range_instance(
        &engine,
        &network,
        "range:wide",
        0.0,
        Layout::from_dims(DataType::F16, Format::Bfwzyx, &[1, 1, 1, 1, 1, 3]),
    )?;
    let implementation = registry.create(&inst, BackendKind::Cpu)?;
    assert_eq!(implementation.type_tag(), cpu::range::TYPE_TAG);

    let err = registry.create(&inst, BackendKind::Device).err();
    assert!(matches!(
        err,
        Some(Error::ImplementationNotFound { key }) if key.format == Format::Bfwzyx && key.backend == BackendKind::Device
    ));
    Ok(())
}

#[test]
fn test_factory_rejects_foreign_kind() -> Result<()> {
    let (engine, network) = network()?;
    let mut map = ImplementationMap::new();
    let gather = PrimitiveKind::custom("gather");
    map.register(
        gather,
        BackendKind::Cpu,
        ShapeMode::Static,
        Arc::new(cpu::range::create),
        &[DataType::I32],
        &[Format::Bfyx],
    );

    let start = engine.attach_host(Layout::scalar(DataType::I32, Format::Bfyx), &[0i32], network.stream())?;
    let output = engine.allocate(Layout::from_dims(DataType::I32, Format::Bfyx, &[2]))?;
    let inst = PrimitiveInst::new("gather:0", gather, Arc::clone(&network), vec![start], output);

    assert!(matches!(map.create(&inst, BackendKind::Cpu), Err(Error::Configuration(_))));
    Ok(())
}

#[test]
fn test_device_range_through_registry() -> Result<()> {
    let (engine, network) = network()?;
    let start = engine.attach_host(Layout::scalar(DataType::F32, Format::Bfzyx), &[0.5f32], network.stream())?;
    let step = engine.attach_host(Layout::scalar(DataType::F32, Format::Bfzyx), &[0.25f32], network.stream())?;
    let stop = engine.attach_host(Layout::scalar(DataType::F32, Format::Bfzyx), &[1.5f32], network.stream())?;
    let output = engine.allocate_memory(
        Layout::from_dims(DataType::F32, Format::Bfzyx, &[1, 1, 1, 1, 4]),
        AllocationType::UsmDevice,
    )?;
    let inst = PrimitiveInst::new(
        "range:device",
        PrimitiveKind::RANGE,
        Arc::clone(&network),
        vec![start, stop, step],
        output,
    );

    let mut implementation = cinder_core::registry::global().create(&inst, BackendKind::Device)?;
    assert!(!implementation.is_cpu());
    assert_eq!(implementation.type_tag(), device::range::TYPE_TAG);

    let gate = network.stream().create_user_event(false);
    let done = implementation.execute(&[gate.clone()], &inst)?;
    assert!(!done.is_set());
    gate.set();
    done.wait();

    let values = read_typed::<f32>(inst.output_memory().as_ref(), network.stream())?;
    assert_eq!(values, vec![0.5, 0.75, 1.0, 1.25]);
    assert!(network.stream().take_failures().is_empty());
    Ok(())
}

#[test]
fn test_device_kernel_shared_across_instances() -> Result<()> {
    let (engine, network) = network()?;
    let layout = Layout::from_dims(DataType::F32, Format::Bfyx, &[8]);
    let a = range_instance(&engine, &network, "range:a", 0.0, layout.clone())?;
    let b = range_instance(&engine, &network, "range:b", 4.0, layout)?;

    let registry = ImplementationMap::with_builtins();
    let mut first = registry.create(&a, BackendKind::Device)?;
    let mut second = registry.create(&b, BackendKind::Device)?;
    assert_eq!(engine.kernels().len(), 1);

    Event::wait_all(&[first.execute(&[], &a)?, second.execute(&[], &b)?]);
    let read = |inst: &PrimitiveInst| read_typed::<f32>(inst.output_memory().as_ref(), network.stream());
    assert_eq!(read(&a)?, (0..8).map(|v| v as f32).collect::<Vec<_>>());
    assert_eq!(read(&b)?, (4..12).map(|v| v as f32).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn test_dynamic_instance_resolves_dynamic_entry() -> Result<()> {
    let (engine, network) = network()?;
    let start = engine.attach_host(Layout::scalar(DataType::I64, Format::Bfyx), &[7i64], network.stream())?;
    let output = engine.allocate(Layout::from_dims(DataType::I64, Format::Bfyx, &[3]))?;
    let inst = PrimitiveInst::new("range:dyn", PrimitiveKind::RANGE, Arc::clone(&network), vec![start], output)
        .with_shape_mode(ShapeMode::Dynamic);

    let mut plan = ExecutionPlan::new();
    plan.add(
        &ImplementationMap::with_builtins(),
        &[BackendKind::Device, BackendKind::Cpu],
        inst,
        &[],
    )?;
    Event::wait_all(&plan.run()?);

    let inst = plan.instance(0).ok_or_else(|| Error::configuration("plan lost its node"))?;
    assert_eq!(read_typed::<i64>(inst.output_memory().as_ref(), network.stream())?, vec![7, 8, 9]);
    assert_eq!(inst.impl_params().output_layout().shape(), &Shape::new(&[3]));
    Ok(())
}

#[test]
fn test_device_impl_keeps_block_size() {
    let implementation = RangeDeviceImpl::new(64);
    assert_eq!(implementation.block_size(), 64);
    assert!(!implementation.has_kernel());
}
