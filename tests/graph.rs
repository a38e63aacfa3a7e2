//! End-to-end render graph scenarios against the null driver.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use vermeil::driver::null::NullDriver;
use vermeil::driver::Driver;
use vermeil::*;

fn init_logger() {
    let _ = pretty_env_logger::try_init();
}

fn setup() -> (Arc<NullDriver>, Arc<ResourceManager>, RenderGraph) {
    init_logger();
    let driver = Arc::new(NullDriver::new());
    let manager = Arc::new(
        ResourceManager::new(driver.clone() as Arc<dyn Driver>, &GraphicsConfig::default())
            .unwrap(),
    );
    let graph = RenderGraph::new(manager.clone(), &GraphicsConfig::default());
    (driver, manager, graph)
}

fn transfer_buffer(manager: &ResourceManager, size: u64, usage: BufferUsageFlags) -> UniqueId<GfxResourceId> {
    manager
        .create_buffer(&BufferDesc {
            size,
            usage,
            memory: MemoryType::DeviceLocal,
        })
        .unwrap()
}

fn color_image(manager: &ResourceManager, width: u32, height: u32) -> UniqueId<GfxResourceId> {
    manager
        .create_image(&ImageDesc::new(
            Dimensions::Dim2d { width, height },
            Format::R8G8B8A8Unorm,
            ImageUsageFlags::COLOR_ATTACHMENT | ImageUsageFlags::SAMPLED,
        ))
        .unwrap()
}

#[test]
fn single_node_transfer() {
    let (driver, manager, graph) = setup();

    let buffer_a = transfer_buffer(&manager, 64, BufferUsageFlags::TRANSFER_SRC);
    let buffer_b = transfer_buffer(&manager, 64, BufferUsageFlags::TRANSFER_DST);
    let a = buffer_a.get();
    let b = buffer_b.get();

    let ran = Arc::new(AtomicBool::new(false));
    let ran_in_cb = ran.clone();
    graph
        .add_transfer(
            QueueType::Transfer,
            &[(a, ResourceUsage::TRANSFER_SRC)],
            &[(b, ResourceUsage::TRANSFER_DST)],
            move |ctx, inputs, outputs| {
                ran_in_cb.store(true, Ordering::SeqCst);
                ctx.copy_buffer(
                    inputs[0],
                    outputs[0],
                    &[BufferCopy {
                        src_offset: 0,
                        dst_offset: 0,
                        size: 64,
                    }],
                )
                .is_ok()
            },
            "copy a->b",
        )
        .unwrap();

    let id = graph.submit().unwrap().expect("non-empty frame");
    assert!(ran.load(Ordering::SeqCst));
    assert!(manager.is_resource_alive(a));
    assert!(manager.is_resource_alive(b));
    assert!(!graph.is_complete(&[id]));

    assert!(graph.wait(&[id], Duration::from_secs(1)));
    assert!(graph.is_complete(&[id]));

    let submissions = driver.submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].queue, QueueType::Transfer);
    assert!(submissions[0]
        .commands
        .iter()
        .any(|c| matches!(c, Command::CopyBuffer { .. })));

    manager.release_resource(buffer_a).unwrap();
    manager.release_resource(buffer_b).unwrap();
}

#[test]
fn producer_consumer_binds_one_concrete_image() {
    let (_driver, manager, graph) = setup();

    let virtual_image = manager
        .create_virtual_image(&VirtualImageDesc {
            dimensions: Dimensions::Dim2d {
                width: 64,
                height: 64,
            },
            format: Format::R8G8B8A8Unorm,
            samples: 1,
            initial_state: InitialState::Undefined,
        })
        .unwrap();
    let v = virtual_image.get();

    let order = Arc::new(Mutex::new(Vec::new()));
    let resolved = Arc::new(Mutex::new(Vec::new()));

    let (order1, resolved1) = (order.clone(), resolved.clone());
    graph
        .add_graphics(
            QueueType::Graphics,
            &[],
            &[(v, ResourceUsage::COLOR_ATTACHMENT)],
            move |ctx, _inputs, outputs| {
                order1.lock().unwrap().push("n1");
                let concrete = ctx.get_output(outputs[0]).expect("bound at submit");
                assert!(!concrete.is_virtual());
                resolved1.lock().unwrap().push(concrete);
                true
            },
            "produce",
        )
        .unwrap();

    let (order2, resolved2) = (order.clone(), resolved.clone());
    graph
        .add_graphics(
            QueueType::Graphics,
            &[(v, ResourceUsage::SAMPLED_IMAGE)],
            &[],
            move |ctx, inputs, _outputs| {
                order2.lock().unwrap().push("n2");
                resolved2.lock().unwrap().push(ctx.get_output(inputs[0]).unwrap());
                true
            },
            "consume",
        )
        .unwrap();

    let id = graph.submit().unwrap().expect("non-empty frame");

    assert_eq!(*order.lock().unwrap(), ["n1", "n2"]);
    let resolved = resolved.lock().unwrap();
    assert_eq!(resolved.len(), 2);
    assert_eq!(resolved[0], resolved[1]);

    // usage union of both declarations lands on the concrete image
    let desc = manager.image_description(resolved[0]);
    assert!(desc
        .usage
        .contains(ImageUsageFlags::COLOR_ATTACHMENT | ImageUsageFlags::SAMPLED));

    assert!(graph.wait(&[id], Duration::from_secs(1)));
    // the batch held the last reference to the bound image
    assert!(!manager.is_resource_alive(resolved[0]));

    manager.release_resource(virtual_image).unwrap();
}

#[test]
fn incomplete_chain_is_dropped() {
    let (_driver, manager, graph) = setup();

    let unwritten = manager
        .create_virtual_image(&VirtualImageDesc::default())
        .unwrap();
    let downstream = manager
        .create_virtual_buffer(&VirtualBufferDesc {
            size: 16,
            initial_state: InitialState::Undefined,
        })
        .unwrap();
    let v = unwritten.get();
    let w = downstream.get();

    let n1 = Arc::new(AtomicBool::new(false));
    let n2 = Arc::new(AtomicBool::new(false));
    let n3 = Arc::new(AtomicBool::new(false));

    // independent node, must still execute
    let n1_cb = n1.clone();
    graph
        .add_transfer(
            QueueType::Transfer,
            &[],
            &[],
            move |_ctx, _i, _o| {
                n1_cb.store(true, Ordering::SeqCst);
                true
            },
            "independent",
        )
        .unwrap();

    // reads a virtual no one writes
    let n2_cb = n2.clone();
    graph
        .add_compute(
            QueueType::Graphics,
            &[(v, ResourceUsage::SAMPLED_IMAGE)],
            &[(w, ResourceUsage::STORAGE_BUFFER)],
            move |_ctx, _i, _o| {
                n2_cb.store(true, Ordering::SeqCst);
                true
            },
            "orphan reader",
        )
        .unwrap();

    // depends on the orphan
    let n3_cb = n3.clone();
    graph
        .add_compute(
            QueueType::Graphics,
            &[(w, ResourceUsage::STORAGE_BUFFER)],
            &[],
            move |_ctx, _i, _o| {
                n3_cb.store(true, Ordering::SeqCst);
                true
            },
            "dependent",
        )
        .unwrap();

    let id = graph.submit().unwrap().expect("independent node submits");
    assert!(n1.load(Ordering::SeqCst));
    assert!(!n2.load(Ordering::SeqCst));
    assert!(!n3.load(Ordering::SeqCst));

    assert!(graph.wait(&[id], Duration::from_secs(1)));
    manager.release_resource(unwritten).unwrap();
    manager.release_resource(downstream).unwrap();
}

#[test]
fn duplicate_writer_fails_submit() {
    let (_driver, manager, graph) = setup();

    let image = color_image(&manager, 16, 16);
    let img = image.get();

    let ran = Arc::new(AtomicUsize::new(0));
    for name in &["first writer", "second writer"] {
        let ran = ran.clone();
        graph
            .add_transfer(
                QueueType::Transfer,
                &[],
                &[(img, ResourceUsage::TRANSFER_DST)],
                move |_ctx, _i, _o| {
                    ran.fetch_add(1, Ordering::SeqCst);
                    true
                },
                name,
            )
            .unwrap();
    }

    assert_eq!(graph.submit(), Err(Error::DuplicateWriter));
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    assert_eq!(graph.in_flight(), 0);

    // frame state was cleared
    assert_eq!(graph.submit(), Ok(None));

    manager.release_resource(image).unwrap();
}

#[test]
fn failed_submit_still_recycles_completed_batches() {
    let (driver, manager, graph) = setup();

    graph
        .add_transfer(QueueType::Transfer, &[], &[], |_c, _i, _o| true, "noop")
        .unwrap();
    graph.submit().unwrap().unwrap();
    assert_eq!(graph.in_flight(), 1);

    // the device finishes, but nothing has walked the in-flight list yet
    driver.wait_idle();
    assert_eq!(graph.in_flight(), 1);

    let image = color_image(&manager, 8, 8);
    let img = image.get();
    for name in &["first writer", "second writer"] {
        graph
            .add_transfer(
                QueueType::Transfer,
                &[],
                &[(img, ResourceUsage::TRANSFER_DST)],
                |_c, _i, _o| true,
                name,
            )
            .unwrap();
    }
    assert_eq!(graph.submit(), Err(Error::DuplicateWriter));
    // even a failed submit recycles whatever already completed
    assert_eq!(graph.in_flight(), 0);

    manager.release_resource(image).unwrap();
}

#[test]
fn adjacent_render_passes_merge_into_subpasses() {
    let (driver, manager, graph) = setup();

    let image = color_image(&manager, 64, 64);
    let img = image.get();

    for i in 0..3u32 {
        graph
            .add_render_pass(
                QueueType::Graphics,
                &[],
                &[],
                move |_ctx, _inputs, _outputs, desc| {
                    desc.add_color_target(ColorTarget {
                        index: 0,
                        image: img,
                        view: ImageViewDesc::default(),
                        load_op: if i == 0 {
                            AttachmentLoadOp::Clear
                        } else {
                            AttachmentLoadOp::Load
                        },
                        store_op: AttachmentStoreOp::Store,
                        clear_value: ClearValue::transparent_black(),
                    });
                    // different viewports of equal count
                    desc.add_viewport(Viewport::from((64 - i, 64)));
                },
                move |ctx, _inputs, _outputs| {
                    ctx.draw(3, 1, 0, 0);
                    true
                },
                "pass",
            )
            .unwrap();
    }

    let id = graph.submit().unwrap().expect("non-empty frame");

    let submissions = driver.submissions();
    assert_eq!(submissions.len(), 1);
    let commands = &submissions[0].commands;

    let count = |pred: &dyn Fn(&Command) -> bool| commands.iter().filter(|c| pred(c)).count();
    assert_eq!(count(&|c| matches!(c, Command::BeginRenderPass { .. })), 1);
    assert_eq!(count(&|c| matches!(c, Command::NextSubpass)), 2);
    assert_eq!(count(&|c| matches!(c, Command::EndRenderPass)), 1);
    assert_eq!(count(&|c| matches!(c, Command::Draw { .. })), 3);

    assert!(graph.wait(&[id], Duration::from_secs(1)));
    manager.release_resource(image).unwrap();
}

#[test]
fn subset_color_targets_merge_with_input_attachments() {
    let (driver, manager, graph) = setup();

    let albedo = color_image(&manager, 64, 64);
    let normal = color_image(&manager, 64, 64);
    let albedo_id = albedo.get();
    let normal_id = normal.get();

    // writes both gbuffer targets
    graph
        .add_render_pass(
            QueueType::Graphics,
            &[],
            &[],
            move |_ctx, _i, _o, desc| {
                desc.add_color_target(ColorTarget {
                    index: 0,
                    image: albedo_id,
                    view: ImageViewDesc::default(),
                    load_op: AttachmentLoadOp::Clear,
                    store_op: AttachmentStoreOp::Store,
                    clear_value: ClearValue::transparent_black(),
                });
                desc.add_color_target(ColorTarget {
                    index: 1,
                    image: normal_id,
                    view: ImageViewDesc::default(),
                    load_op: AttachmentLoadOp::Clear,
                    store_op: AttachmentStoreOp::Store,
                    clear_value: ClearValue::transparent_black(),
                });
                desc.add_viewport(Viewport::from((64, 64)));
            },
            |ctx, _i, _o| {
                ctx.draw(3, 1, 0, 0);
                true
            },
            "gbuffer",
        )
        .unwrap();

    // writes a strict subset of the targets while reading the other one as
    // an input attachment
    graph
        .add_render_pass(
            QueueType::Graphics,
            &[],
            &[],
            move |_ctx, _i, _o, desc| {
                desc.add_color_target(ColorTarget {
                    index: 0,
                    image: albedo_id,
                    view: ImageViewDesc::default(),
                    load_op: AttachmentLoadOp::Load,
                    store_op: AttachmentStoreOp::Store,
                    clear_value: ClearValue::transparent_black(),
                });
                desc.input_targets.push(1);
                desc.add_viewport(Viewport::from((64, 64)));
            },
            |ctx, _i, _o| {
                ctx.draw(3, 1, 0, 0);
                true
            },
            "lighting",
        )
        .unwrap();

    let id = graph.submit().unwrap().unwrap();

    let submissions = driver.submissions();
    assert_eq!(submissions.len(), 1);
    let commands = &submissions[0].commands;
    let count = |pred: &dyn Fn(&Command) -> bool| commands.iter().filter(|c| pred(c)).count();
    assert_eq!(count(&|c| matches!(c, Command::BeginRenderPass { .. })), 1);
    assert_eq!(count(&|c| matches!(c, Command::NextSubpass)), 1);
    assert_eq!(count(&|c| matches!(c, Command::EndRenderPass)), 1);
    assert_eq!(count(&|c| matches!(c, Command::Draw { .. })), 2);

    // both gbuffer targets back the single merged pass
    let attachment_count = commands
        .iter()
        .find_map(|c| match c {
            Command::BeginRenderPass { clear_values, .. } => Some(clear_values.len()),
            _ => None,
        })
        .unwrap();
    assert_eq!(attachment_count, 2);

    assert!(graph.wait(&[id], Duration::from_secs(1)));
    manager.release_resource(albedo).unwrap();
    manager.release_resource(normal).unwrap();
}

#[test]
fn incompatible_render_passes_split() {
    let (driver, manager, graph) = setup();

    let image_a = color_image(&manager, 64, 64);
    let image_b = color_image(&manager, 32, 32);

    for &(img, size) in &[(image_a.get(), 64u32), (image_b.get(), 32u32)] {
        graph
            .add_render_pass(
                QueueType::Graphics,
                &[],
                &[],
                move |_ctx, _i, _o, desc| {
                    desc.add_color_target(ColorTarget {
                        index: 0,
                        image: img,
                        view: ImageViewDesc::default(),
                        load_op: AttachmentLoadOp::Clear,
                        store_op: AttachmentStoreOp::Store,
                        clear_value: ClearValue::transparent_black(),
                    });
                    desc.add_viewport(Viewport::from((size, size)));
                },
                |ctx, _i, _o| {
                    ctx.draw(3, 1, 0, 0);
                    true
                },
                "pass",
            )
            .unwrap();
    }

    let id = graph.submit().unwrap().unwrap();
    let submissions = driver.submissions();
    let begins = submissions[0]
        .commands
        .iter()
        .filter(|c| matches!(c, Command::BeginRenderPass { .. }))
        .count();
    assert_eq!(begins, 2);

    assert!(graph.wait(&[id], Duration::from_secs(1)));
    manager.release_resource(image_a).unwrap();
    manager.release_resource(image_b).unwrap();
}

fn test_pack() -> Vec<u8> {
    let blob = |stage: ShaderStageFlags| ShaderBlob {
        stage,
        code: vec![0xde, 0xad, 0xbe, 0xef],
        spec_constants: Vec::new(),
    };
    let mut builder = PackBuilder::new();
    builder.graphics(
        "lit",
        GraphicsTemplateData {
            shaders: vec![
                blob(ShaderStageFlags::VERTEX),
                blob(ShaderStageFlags::FRAGMENT),
            ],
            supported_topology: PrimitiveTopology::TriangleList.bit()
                | PrimitiveTopology::TriangleStrip.bit(),
            patch_control_points: 0,
            layout: TemplateLayout::default(),
        },
    );
    builder.build()
}

#[test]
fn pipeline_cache_dedups_dynamic_state_variants() {
    let (driver, manager, _graph) = setup();

    manager.load_pipeline_pack(&test_pack()[..]).unwrap();

    let mut info = RenderPassInfo::default();
    info.attachments.push(AttachmentInfo {
        format: Format::R8G8B8A8Unorm,
        samples: 1,
        load_op: AttachmentLoadOp::Clear,
        store_op: AttachmentStoreOp::Store,
    });
    let mut subpass = SubpassInfo::default();
    subpass.color_attachments.push(0);
    info.subpasses.push(subpass);
    let render_pass = manager.create_render_pass(&info).unwrap();

    let mut desc1 = GraphicsPipelineDesc::new(render_pass.get());
    desc1.render_state.color.attachments.push(ColorBufferState::default());
    desc1.dynamic_state = DynamicStateFlags::VIEWPORT;

    let mut desc2 = desc1.clone();
    desc2.dynamic_state = DynamicStateFlags::VIEWPORT | DynamicStateFlags::SCISSOR;

    let before = driver.graphics_pipelines_created();
    let p1 = manager.graphics_pipeline("lit", &desc1).unwrap();
    let p2 = manager.graphics_pipeline("lit", &desc2).unwrap();

    assert_eq!(p1, p2);
    assert_eq!(manager.graphics_pipeline_refcount(p1).unwrap(), 2);
    assert_eq!(driver.graphics_pipelines_created(), before + 1);

    manager.release_graphics_pipeline(p1).unwrap();
    manager.release_graphics_pipeline(p2).unwrap();
    manager.release_render_pass(render_pass).unwrap();
}

#[test]
fn unsupported_topology_is_rejected() {
    let (_driver, manager, _graph) = setup();
    manager.load_pipeline_pack(&test_pack()[..]).unwrap();

    let render_pass = manager.create_render_pass(&RenderPassInfo::default()).unwrap();
    let mut desc = GraphicsPipelineDesc::new(render_pass.get());
    desc.render_state.input_assembly.topology = PrimitiveTopology::PointList;

    assert_eq!(
        manager.graphics_pipeline("lit", &desc),
        Err(Error::UnsupportedDescription)
    );
    manager.release_render_pass(render_pass).unwrap();
}

#[test]
fn readback_delivers_written_data() {
    let (_driver, manager, graph) = setup();

    let buffer = transfer_buffer(
        &manager,
        16,
        BufferUsageFlags::TRANSFER_SRC | BufferUsageFlags::TRANSFER_DST,
    );
    let b = buffer.get();

    let received = Arc::new(Mutex::new(Vec::new()));
    let received_cb = received.clone();
    graph
        .add_transfer(
            QueueType::Transfer,
            &[(b, ResourceUsage::TRANSFER_SRC)],
            &[],
            move |ctx, _i, _o| {
                ctx.update_buffer(b, 0, &[1, 2, 3, 4]).unwrap();
                ctx.read_buffer(b, 0, 4, move |data| {
                    received_cb.lock().unwrap().extend_from_slice(data);
                })
                .unwrap();
                true
            },
            "write then read back",
        )
        .unwrap();

    let id = graph.submit().unwrap().unwrap();
    assert!(received.lock().unwrap().is_empty());

    assert!(graph.wait(&[id], Duration::from_secs(1)));
    assert_eq!(*received.lock().unwrap(), [1, 2, 3, 4]);

    manager.release_resource(buffer).unwrap();
}

#[test]
fn present_allowed_queues_only() {
    let (driver, manager, graph) = setup();

    assert_eq!(graph.present_queues(), QueueMask::GRAPHICS);

    let image = color_image(&manager, 8, 8);
    let img = image.get();

    let present_results = Arc::new(Mutex::new(Vec::new()));

    let results = present_results.clone();
    graph
        .add_transfer(
            QueueType::Graphics,
            &[(img, ResourceUsage::TRANSFER_SRC)],
            &[],
            move |ctx, inputs, _o| {
                results.lock().unwrap().push(ctx.present(inputs[0], 0, 0).is_ok());
                true
            },
            "present on graphics",
        )
        .unwrap();

    let results = present_results.clone();
    graph
        .add_transfer(
            QueueType::Transfer,
            &[(img, ResourceUsage::TRANSFER_SRC)],
            &[],
            move |ctx, inputs, _o| {
                results.lock().unwrap().push(ctx.present(inputs[0], 0, 0).is_ok());
                true
            },
            "present on transfer",
        )
        .unwrap();

    let id = graph.submit().unwrap().unwrap();
    assert!(graph.wait(&[id], Duration::from_secs(1)));

    assert_eq!(*present_results.lock().unwrap(), [true, false]);
    assert_eq!(driver.presents().len(), 1);

    manager.release_resource(image).unwrap();
}

#[test]
fn cross_queue_segments_are_chained() {
    let (driver, manager, graph) = setup();

    let buffer = transfer_buffer(
        &manager,
        16,
        BufferUsageFlags::TRANSFER_DST | BufferUsageFlags::STORAGE,
    );
    let b = buffer.get();

    graph
        .add_transfer(
            QueueType::Transfer,
            &[],
            &[(b, ResourceUsage::TRANSFER_DST)],
            move |ctx, _i, outputs| ctx.fill_buffer(outputs[0], 0, 16, 0).is_ok(),
            "upload",
        )
        .unwrap();
    graph
        .add_compute(
            QueueType::AsyncCompute,
            &[(b, ResourceUsage::STORAGE_BUFFER)],
            &[],
            |ctx, _i, _o| {
                ctx.dispatch([1, 1, 1]);
                true
            },
            "consume",
        )
        .unwrap();

    let id = graph.submit().unwrap().unwrap();
    let submissions = driver.submissions();
    assert_eq!(submissions.len(), 2);
    assert_eq!(submissions[0].queue, QueueType::Transfer);
    assert_eq!(submissions[1].queue, QueueType::AsyncCompute);
    // the second segment waits on the first
    assert_eq!(submissions[0].signal_semaphores, 1);
    assert_eq!(submissions[1].wait_semaphores, 1);

    assert!(graph.wait(&[id], Duration::from_secs(1)));
    manager.release_resource(buffer).unwrap();
}

#[test]
fn queue_admissibility() {
    let (_driver, _manager, graph) = setup();

    assert_eq!(
        graph.add_render_pass(
            QueueType::AsyncCompute,
            &[],
            &[],
            |_ctx, _i, _o, _desc| {},
            |_ctx, _i, _o| true,
            "bad queue",
        ),
        Err(Error::QueueMismatch)
    );
    assert_eq!(
        graph.add_compute(QueueType::Transfer, &[], &[], |_c, _i, _o| true, "bad"),
        Err(Error::QueueMismatch)
    );
    assert_eq!(
        graph.add_graphics(QueueType::Transfer, &[], &[], |_c, _i, _o| true, "bad"),
        Err(Error::QueueMismatch)
    );
}

#[test]
fn empty_submit_is_idempotent() {
    let (_driver, _manager, graph) = setup();

    assert_eq!(graph.submit(), Ok(None));
    assert_eq!(graph.in_flight(), 0);

    assert!(graph.wait_idle());
    assert_eq!(graph.submit(), Ok(None));
    assert_eq!(graph.in_flight(), 0);
}

#[test]
fn in_flight_list_drains_after_wait() {
    let (_driver, _manager, graph) = setup();

    graph
        .add_transfer(QueueType::Transfer, &[], &[], |_c, _i, _o| true, "noop")
        .unwrap();
    let id = graph.submit().unwrap().unwrap();
    assert_eq!(graph.in_flight(), 1);

    assert!(graph.wait(&[id], Duration::from_secs(1)));
    assert_eq!(graph.in_flight(), 0);

    // wait_idle keeps the list empty, further empty submits change nothing
    assert!(graph.wait_idle());
    assert_eq!(graph.submit(), Ok(None));
    assert_eq!(graph.in_flight(), 0);
}

#[test]
fn stale_batch_ids_read_as_complete() {
    let (_driver, _manager, graph) = setup();

    graph
        .add_transfer(QueueType::Transfer, &[], &[], |_c, _i, _o| true, "noop")
        .unwrap();
    let id = graph.submit().unwrap().unwrap();
    assert!(graph.wait(&[id], Duration::from_secs(1)));

    // the slot may be reused now; the old id must still read as complete
    assert!(graph.is_complete(&[id]));

    graph
        .add_transfer(QueueType::Transfer, &[], &[], |_c, _i, _o| true, "noop")
        .unwrap();
    let id2 = graph.submit().unwrap().unwrap();
    assert!(graph.is_complete(&[id]));
    assert!(graph.wait(&[id2], Duration::from_secs(1)));
}

#[test]
fn failed_callback_does_not_poison_downstream() {
    let (_driver, manager, graph) = setup();

    let virtual_image = manager
        .create_virtual_image(&VirtualImageDesc {
            dimensions: Dimensions::Dim2d {
                width: 8,
                height: 8,
            },
            format: Format::R8G8B8A8Unorm,
            samples: 1,
            initial_state: InitialState::Undefined,
        })
        .unwrap();
    let v = virtual_image.get();

    let downstream_ran = Arc::new(AtomicBool::new(false));

    graph
        .add_graphics(
            QueueType::Graphics,
            &[],
            &[(v, ResourceUsage::COLOR_ATTACHMENT)],
            |_ctx, _i, _o| false, // fails
            "failing producer",
        )
        .unwrap();

    let ran = downstream_ran.clone();
    graph
        .add_graphics(
            QueueType::Graphics,
            &[(v, ResourceUsage::SAMPLED_IMAGE)],
            &[],
            move |_ctx, _i, _o| {
                ran.store(true, Ordering::SeqCst);
                true
            },
            "reader",
        )
        .unwrap();

    let id = graph.submit().unwrap().unwrap();
    // outputs of the failed node still count as produced
    assert!(downstream_ran.load(Ordering::SeqCst));

    assert!(graph.wait(&[id], Duration::from_secs(1)));
    manager.release_resource(virtual_image).unwrap();
}
