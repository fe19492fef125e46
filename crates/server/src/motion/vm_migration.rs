/// 整机在线存储迁移编排
///
/// 一组卷随运行中的虚拟机整体搬迁。流程：预检 → 逐卷准备
/// （目录复制、目标建数据、克隆语义判定、授权与磁盘描述符）→
/// 目标宿主机准备 → 单条迁移命令 → 收尾。
/// 收尾保证不变式：每个卷恰有一端存活，另一端销毁并打删除标记，
/// 任何中途失败都向这个保证滚动，不留两端并存或两端皆失的状态

use std::collections::HashMap;
use tracing::{error, info, warn};

use common::models::PoolType;
use common::ws_rpc::{
    CheckStorageAvailabilityRequest, ConnectVolumeRequest, DisconnectVolumeRequest,
    DiskDescriptor, MigrateVmWithStorageRequest, MigrationOptionsDescriptor,
    PrepareForMigrationRequest, VmDescriptor,
};
use common::{Error, Result};

use super::catalog::{MotionCatalog, ObjectChanges};
use super::driver::{try_update_qos, QosState, StoreDriver};
use super::endpoint::{node_reaches_store, HostEndpoint};
use super::lifecycle::ObjectEvent;
use super::object::{DataEntry, DataObject, ObjectRef};
use super::runner::{AgentAnswer, AgentCommand, CommandRunner};
use super::storage_system::MigrationHookSet;
use super::strategy::{CopyOutcome, VmStorageMigrationJob, VolumePlacement};
use super::MotionContext;

/// 一个已在目标端就位、等待迁移命令的卷
struct PreparedVolume {
    placement: VolumePlacement,
    dup: crate::db::models::volume::Model,
    nfs_to_nfs: bool,
}

impl PreparedVolume {
    fn dup_entry(&self) -> DataEntry {
        DataEntry::new(
            DataObject::Volume(self.dup.clone()),
            self.placement.dest_store.clone(),
        )
    }
}

/// 整机存储迁移的编排例程
///
/// 虚拟化差异（池准入、磁盘描述符、目标路径、模板预拷）全部经钩子注入，
/// 例程本身只有一份
pub async fn execute(
    ctx: &MotionContext,
    hooks: &dyn MigrationHookSet,
    job: &VmStorageMigrationJob,
) -> CopyOutcome {
    info!(
        "整机存储迁移开始: vm={}, src={}, dest={}, volumes={}",
        job.vm.name,
        job.src_host.node_id,
        job.dest_host.node_id,
        job.placements.len()
    );

    if let Err(message) = verify_live_migration(ctx, job).await {
        return CopyOutcome::failed(message);
    }

    // 逐卷准备
    let mut prepared: Vec<PreparedVolume> = Vec::new();
    let mut disks: HashMap<String, DiskDescriptor> = HashMap::new();
    for placement in &job.placements {
        if !should_migrate_volume(placement, &job.dest_host) {
            info!(
                "卷无需迁移（目标可直达共享存储）: volume={}",
                placement.source.object.uuid()
            );
            continue;
        }

        match prepare_volume(ctx, hooks, job, placement).await {
            Ok((p, disk)) => {
                disks.insert(p.placement.source.object.uuid().to_string(), disk);
                prepared.push(p);
            }
            Err(e) => {
                error!(
                    "卷准备失败: volume={}, error={}",
                    placement.source.object.uuid(),
                    e
                );
                cleanup_prepared(ctx, &job.dest_host, &prepared).await;
                return CopyOutcome::failed(format!(
                    "卷准备失败: volume={}, {}",
                    placement.source.object.uuid(),
                    e
                ));
            }
        }
    }

    if prepared.is_empty() {
        return CopyOutcome::ok("所有卷均无需迁移");
    }

    let vm_desc = VmDescriptor {
        name: job.vm.name.clone(),
        details: Default::default(),
    };

    // 目标宿主机准备：失败对整批致命，不做逐卷重试
    let prep_answer = ctx
        .runner
        .send(
            &job.dest_host.node_id,
            AgentCommand::PrepareForMigration(PrepareForMigrationRequest {
                vm: vm_desc.clone(),
                rollback: false,
            }),
        )
        .await;
    if !prep_answer.success() {
        error!("目标宿主机准备失败: {}", prep_answer.message());
        handle_post_migration(ctx, job, &prepared, false).await;
        return CopyOutcome::failed(format!("目标宿主机准备失败: {}", prep_answer.message()));
    }

    // 迁移中状态：源与目标记录同时进入 Migrating
    for p in &prepared {
        let src_ref = p.placement.source.object.object_ref();
        let dup_ref = ObjectRef::volume(&p.dup.id);
        if let Err(e) = ctx
            .catalog
            .transition(&src_ref, ObjectEvent::MigrateRequested, ObjectChanges::none())
            .await
        {
            warn!("源卷进入迁移态失败（继续）: {}", e);
        }
        if let Err(e) = ctx
            .catalog
            .transition(&dup_ref, ObjectEvent::MigrateRequested, ObjectChanges::none())
            .await
        {
            warn!("目标卷进入迁移态失败（继续）: {}", e);
        }
    }

    // 整批标志：任一卷对为 NFS→NFS 即启用共享 NFS 增量传输
    let incremental = prepared.iter().any(|p| p.nfs_to_nfs);
    let managed_storage = prepared.iter().any(|p| p.placement.dest_store.managed);

    let command = AgentCommand::MigrateVmWithStorage(MigrateVmWithStorageRequest {
        vm_name: job.vm.name.clone(),
        dest_ip: job.dest_host.ip_address.clone(),
        windows_guest: job.vm.os_type == "windows",
        vm: vm_desc,
        disks,
        managed_storage,
        incremental_on_shared_nfs: incremental,
        auto_converge: ctx.config.kvm_auto_converge,
        wait_secs: ctx.config.online_migration_wait_secs,
    });

    let answer = ctx.runner.send(&job.src_host.node_id, command).await;
    let success = answer.success();
    if success {
        info!("整机存储迁移命令完成: vm={}", job.vm.name);
    } else {
        error!("整机存储迁移失败: vm={}, error={}", job.vm.name, answer.message());
    }

    handle_post_migration(ctx, job, &prepared, success).await;

    if success {
        CopyOutcome::ok(format!("整机存储迁移完成: {} 个卷", prepared.len()))
    } else {
        CopyOutcome::failed(format!("整机存储迁移失败: {}", answer.message()))
    }
}

/// 迁移前置校验
///
/// 源池必须全部非托管；目标池必须统一为全托管或全非托管；
/// 非托管 NFS 目标必须是集群作用域；经非托管 NFS 目标承接的源池
/// 必须已挂载到目标宿主机（显式探测，数据移动前完成）
async fn verify_live_migration(
    ctx: &MotionContext,
    job: &VmStorageMigrationJob,
) -> std::result::Result<(), String> {
    // 原地保留的卷不参与校验
    let migrating: Vec<&VolumePlacement> = job
        .placements
        .iter()
        .filter(|p| should_migrate_volume(p, &job.dest_host))
        .collect();
    if migrating.is_empty() {
        return Ok(());
    }

    for p in &migrating {
        if p.source.store.managed {
            return Err(format!(
                "源存储池必须全部为非托管存储: volume={}",
                p.source.object.uuid()
            ));
        }
    }

    let managed_count = migrating.iter().filter(|p| p.dest_store.managed).count();
    if managed_count != 0 && managed_count != migrating.len() {
        return Err("目标存储池必须统一为全托管或全非托管，不支持混合".to_string());
    }

    let mut probe = HashMap::new();
    for p in &migrating {
        if p.dest_store.managed || p.dest_store.pool_type != PoolType::Nfs {
            continue;
        }
        if p.dest_store.scope != common::models::StoreScope::Cluster {
            return Err(format!(
                "非托管 NFS 目标池必须是集群作用域: pool={}",
                p.dest_store.id
            ));
        }
        probe.insert(
            p.source.object.uuid().to_string(),
            p.source.store.descriptor(),
        );
    }

    if !probe.is_empty() {
        let answer = ctx
            .runner
            .send(
                &job.dest_host.node_id,
                AgentCommand::CheckStorageAvailability(CheckStorageAvailabilityRequest {
                    pools_by_volume: probe,
                }),
            )
            .await;
        match answer {
            AgentAnswer::CheckStorageAvailability(resp) if resp.success => {
                for (uuid, ok) in &resp.available {
                    if !ok {
                        return Err(format!(
                            "源存储池未挂载到目标宿主机: volume={}",
                            uuid
                        ));
                    }
                }
            }
            other => {
                return Err(format!("目标宿主机存储探测失败: {}", other.message()));
            }
        }
    }

    Ok(())
}

/// 共享存储且不换池的卷原地保留，跳过迁移
fn should_migrate_volume(placement: &VolumePlacement, dest_host: &HostEndpoint) -> bool {
    let src = &placement.source.store;
    let reachable = node_reaches_store(src, &dest_host.node_id, dest_host.cluster_id.as_deref());
    !(reachable && placement.dest_store.id == src.id)
}

/// 单卷准备
///
/// 目录记录复制 → 目标端建数据（MigrationCopy 事件环绕）→
/// 外部可寻址标识与路径落盘 → 克隆语义 → 授权 + 磁盘描述符
async fn prepare_volume(
    ctx: &MotionContext,
    hooks: &dyn MigrationHookSet,
    job: &VmStorageMigrationJob,
    placement: &VolumePlacement,
) -> Result<(PreparedVolume, DiskDescriptor)> {
    let volume = match &placement.source.object {
        DataObject::Volume(v) => v,
        other => {
            return Err(Error::InvalidArgument(format!(
                "整机迁移只针对存储卷: {}",
                other.uuid()
            )))
        }
    };

    // 1. 模板预拷贝钩子（缺省不做）
    hooks.pre_copy_template(ctx, placement, &job.dest_host).await?;

    // 2. 目标池上的目录记录副本
    let dup = ctx
        .catalog
        .duplicate_volume(&volume.id, &placement.dest_store.id)
        .await?;
    let dup_ref = ObjectRef::volume(&dup.id);

    // 3. 目标端建数据
    ctx.catalog
        .transition(&dup_ref, ObjectEvent::MigrationCopyRequested, ObjectChanges::none())
        .await?;

    let dup_entry = DataEntry::new(DataObject::Volume(dup.clone()), placement.dest_store.clone());
    let driver = ctx.drivers.for_store(&placement.dest_store);
    let created = match driver.create_object(&dup_entry).await {
        Ok(resp) => resp,
        Err(e) => {
            ctx.catalog
                .transition(&dup_ref, ObjectEvent::OperationFailed, ObjectChanges::none())
                .await
                .ok();
            ctx.catalog.expunge(&dup_ref).await.ok();
            return Err(e);
        }
    };

    // 钩子可能在目标宿主机上预置根盘并给出路径
    let hook_path = hooks
        .prepare_destination_path(ctx, placement, &dup, &job.dest_host)
        .await?;

    // 外部可寻址标识：托管为阵列 IQN，否则沿用 uuid
    let array_id = if placement.dest_store.managed {
        Some(
            created
                .path
                .clone()
                .unwrap_or_else(|| format!("iqn.2010-01.cloud.storage:{}", dup.uuid)),
        )
    } else {
        None
    };
    let chosen_path = hook_path.or_else(|| created.path.clone());

    let mut changes = ObjectChanges::none();
    changes.path = chosen_path;
    changes.array_id = array_id;
    changes.size_gb = created.size_gb;
    changes.node_id = Some(job.dest_host.node_id.clone());
    ctx.catalog
        .transition(&dup_ref, ObjectEvent::MigrationCopySucceeded, changes)
        .await?;

    let dup = ctx
        .catalog
        .volume(&dup.id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("目标卷记录消失: {}", dup.id)))?;
    let dup_entry = DataEntry::new(DataObject::Volume(dup.clone()), placement.dest_store.clone());

    // 4. 链接克隆 / 完整克隆语义
    let options = migration_options(ctx, volume, placement).await?;

    // 5. 授权目标宿主机并构造磁盘描述符
    if let Err(e) = driver.grant_access(&dup_entry, &job.dest_host).await {
        destroy_and_expunge(ctx, &dup_entry).await;
        return Err(e);
    }

    let nfs_to_nfs = placement.source.store.pool_type == PoolType::Nfs
        && placement.dest_store.pool_type == PoolType::Nfs
        && !placement.source.store.managed
        && !placement.dest_store.managed;

    let mut disk = hooks.build_disk_descriptor(placement, dup.path.as_deref(), Some(options));

    if nfs_to_nfs {
        // 纯 NFS 间迁移不需要通用块描述符：连接目标宿主机，
        // 用连接返回的挂载路径作为描述符源端
        let answer = ctx
            .runner
            .send(
                &job.dest_host.node_id,
                AgentCommand::ConnectVolume(ConnectVolumeRequest {
                    object: dup_entry.descriptor(),
                }),
            )
            .await;
        match answer {
            AgentAnswer::ConnectVolume(resp) if resp.success => {
                disk.source_path = resp.path;
            }
            other => {
                destroy_and_expunge(ctx, &dup_entry).await;
                return Err(Error::Remote(format!(
                    "目标卷连接失败: {}",
                    other.message()
                )));
            }
        }
    }

    Ok((
        PreparedVolume {
            placement: placement.clone(),
            dup,
            nfs_to_nfs,
        },
        disk,
    ))
}

/// 克隆语义判定
///
/// 源盘有基底模板 → 链接克隆：目标池已有模板落位则直接复用，
/// 否则标记由 Agent 负责复制基底；无基底 → 完整克隆，
/// 记录迁移前快照标记。两种形式都带单卷迁移时限
async fn migration_options(
    ctx: &MotionContext,
    volume: &crate::db::models::volume::Model,
    placement: &VolumePlacement,
) -> Result<MigrationOptionsDescriptor> {
    let timeout_secs = ctx.config.migrate_wait_secs;

    if let Some(template_id) = &volume.template_id {
        let existing = ctx
            .catalog
            .template_ref_on_pool(template_id, &placement.dest_store.id)
            .await?;
        return Ok(match existing {
            Some(r) => MigrationOptionsDescriptor {
                linked_clone: true,
                backing_path: r.path,
                copy_backing_file: false,
                snapshot_name: None,
                timeout_secs,
            },
            None => MigrationOptionsDescriptor {
                linked_clone: true,
                backing_path: None,
                copy_backing_file: true,
                snapshot_name: None,
                timeout_secs,
            },
        });
    }

    Ok(MigrationOptionsDescriptor {
        linked_clone: false,
        backing_path: None,
        copy_backing_file: false,
        snapshot_name: Some(format!("premigration-{}", volume.uuid)),
        timeout_secs,
    })
}

/// 迁移收尾
///
/// 成功：目标记录收养源卷身份并就绪，快照改挂目标，源卷销毁并打删除标记。
/// 失败：断开并回收目标端访问，两端标记失败，目标卷销毁并打删除标记。
/// 无论成败，限速档位一律复位为 NoMigration
async fn handle_post_migration(
    ctx: &MotionContext,
    job: &VmStorageMigrationJob,
    prepared: &[PreparedVolume],
    success: bool,
) {
    if !success {
        // 回滚目标宿主机的准备动作（尽力而为）
        let answer = ctx
            .runner
            .send(
                &job.dest_host.node_id,
                AgentCommand::PrepareForMigration(PrepareForMigrationRequest {
                    vm: VmDescriptor {
                        name: job.vm.name.clone(),
                        details: Default::default(),
                    },
                    rollback: true,
                }),
            )
            .await;
        if !answer.success() {
            warn!("目标宿主机准备回滚失败（忽略）: {}", answer.message());
        }
    }

    for p in prepared {
        let src_entry = &p.placement.source;
        let src_ref = src_entry.object.object_ref();
        let dup_ref = ObjectRef::volume(&p.dup.id);
        let dup_entry = p.dup_entry();

        if success {
            if let Err(e) = ctx
                .catalog
                .transition(&dup_ref, ObjectEvent::OperationSucceeded, ObjectChanges::none())
                .await
            {
                warn!("目标卷就绪转换失败（继续）: {}", e);
            }
            if let Err(e) = ctx
                .catalog
                .transition(&src_ref, ObjectEvent::OperationSucceeded, ObjectChanges::none())
                .await
            {
                warn!("源卷复位转换失败（继续）: {}", e);
            }

            // 目标记录收养源卷身份，快照链改挂新卷
            if let Err(e) = ctx.catalog.adopt_volume_identity(&src_ref.id, &dup_ref.id).await {
                error!("目标卷身份收养失败: {}", e);
            }
            match ctx.catalog.reparent_snapshots(&src_ref.id, &dup_ref.id).await {
                Ok(n) if n > 0 => info!("已改挂 {} 个快照到新卷", n),
                Ok(_) => {}
                Err(e) => warn!("快照改挂失败（忽略）: {}", e),
            }

            destroy_and_expunge(ctx, src_entry).await;
        } else {
            // 断开并回收目标端访问
            if p.nfs_to_nfs {
                let answer = ctx
                    .runner
                    .send(
                        &job.dest_host.node_id,
                        AgentCommand::DisconnectVolume(DisconnectVolumeRequest {
                            object: dup_entry.descriptor(),
                        }),
                    )
                    .await;
                if !answer.success() {
                    warn!("目标卷断开失败（忽略）: {}", answer.message());
                }
            }
            let driver = ctx.drivers.for_store(&p.placement.dest_store);
            if let Err(e) = driver.revoke_access(&dup_entry, &job.dest_host).await {
                warn!("目标卷访问回收失败（忽略）: {}", e);
            }

            if let Err(e) = ctx
                .catalog
                .transition(&dup_ref, ObjectEvent::OperationFailed, ObjectChanges::none())
                .await
            {
                warn!("目标卷失败转换失败（继续）: {}", e);
            }
            if let Err(e) = ctx
                .catalog
                .transition(&src_ref, ObjectEvent::OperationFailed, ObjectChanges::none())
                .await
            {
                warn!("源卷失败转换失败（继续）: {}", e);
            }

            destroy_and_expunge(ctx, &dup_entry).await;
        }

        // 限速档位一律复位
        if p.placement.source.store.managed {
            let driver = ctx.drivers.for_store(&p.placement.source.store);
            try_update_qos(&driver, src_entry, QosState::NoMigration).await;
        }
        if p.placement.dest_store.managed {
            let driver = ctx.drivers.for_store(&p.placement.dest_store);
            try_update_qos(&driver, &dup_entry, QosState::NoMigration).await;
        }
    }
}

/// 迁移命令尚未发出时的逐卷回退
async fn cleanup_prepared(ctx: &MotionContext, dest_host: &HostEndpoint, prepared: &[PreparedVolume]) {
    for p in prepared {
        let dup_entry = p.dup_entry();
        let driver = ctx.drivers.for_store(&p.placement.dest_store);
        if let Err(e) = driver.revoke_access(&dup_entry, dest_host).await {
            warn!("目标卷访问回收失败（忽略）: {}", e);
        }
        destroy_and_expunge(ctx, &dup_entry).await;
    }
}

/// 销毁数据并给目录行打删除标记
///
/// 远端清理失败仅记日志：目录必须向"恰有一端存活"的不变式收敛
async fn destroy_and_expunge(ctx: &MotionContext, entry: &DataEntry) {
    let object_ref = entry.object.object_ref();

    if let Err(e) = ctx
        .catalog
        .transition(&object_ref, ObjectEvent::DestroyRequested, ObjectChanges::none())
        .await
    {
        warn!("进入销毁态失败（继续）: id={}, error={}", object_ref.id, e);
    }

    let driver = ctx.drivers.for_store(&entry.store);
    if let Err(e) = driver.delete_object(entry).await {
        warn!("远端数据清理失败（仅记日志）: id={}, error={}", object_ref.id, e);
    }

    if let Err(e) = ctx
        .catalog
        .transition(&object_ref, ObjectEvent::OperationSucceeded, ObjectChanges::none())
        .await
    {
        warn!("销毁完成转换失败（继续）: id={}, error={}", object_ref.id, e);
    }
    if let Err(e) = ctx.catalog.expunge(&object_ref).await {
        error!("删除标记写入失败: id={}, error={}", object_ref.id, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motion::object::DataStore;
    use crate::motion::storage_system::ArrayMigrationHooks;
    use crate::motion::kvm::KvmMigrationHooks;
    use crate::motion::testkit;

    /// 双 NFS 集群池上的两卷迁移作业
    async fn nfs_job(
        catalog: &std::sync::Arc<testkit::MemoryCatalog>,
    ) -> VmStorageMigrationJob {
        let src_pool = testkit::pool_builder("p-src")
            .pool_type("nfs")
            .scope("cluster")
            .scope_id("c1")
            .build();
        let dest_pool = testkit::pool_builder("p-dest")
            .pool_type("nfs")
            .scope("cluster")
            .scope_id("c2")
            .build();
        catalog.add_pool(src_pool.clone()).await;
        catalog.add_pool(dest_pool.clone()).await;

        let vm = testkit::vm_model("vm1", "vm-01", "n1", "linux");
        catalog.add_vm(vm.clone()).await;

        let mut placements = Vec::new();
        for id in ["va", "vb"] {
            let vol = testkit::volume_builder(id, "p-src").vm_id("vm1").build();
            catalog.add_volume(vol.clone()).await;
            placements.push(VolumePlacement {
                source: DataEntry::new(
                    DataObject::Volume(vol),
                    DataStore::from_pool(&src_pool),
                ),
                dest_store: DataStore::from_pool(&dest_pool),
            });
        }

        let mut src_host = testkit::host_endpoint("n1");
        src_host.cluster_id = Some("c1".to_string());
        let mut dest_host = testkit::host_endpoint("n2");
        dest_host.cluster_id = Some("c2".to_string());

        VmStorageMigrationJob {
            vm,
            src_host,
            dest_host,
            placements,
        }
    }

    #[tokio::test]
    async fn test_successful_migration_keeps_exactly_one_side() {
        let catalog = testkit::memory_catalog();
        let runner = testkit::scripted_runner();
        let selector = testkit::fixed_selector(Some(testkit::host_endpoint("n2")));
        let ctx = testkit::context(catalog.clone(), runner.clone(), selector);

        let job = nfs_job(&catalog).await;
        let outcome = execute(&ctx, &KvmMigrationHooks, &job).await;
        assert!(outcome.success, "失败: {}", outcome.message);

        // 不变式：每个卷恰有一端存活；成功时源卷销毁
        for src_id in ["va", "vb"] {
            let src = catalog.volume(src_id).await.unwrap().unwrap();
            assert!(src.removed_at.is_some(), "源卷应已打删除标记");

            let survivors: Vec<_> = catalog
                .all_volumes()
                .await
                .into_iter()
                .filter(|v| v.uuid == format!("uuid-{}", src_id) && v.removed_at.is_none())
                .collect();
            assert_eq!(survivors.len(), 1, "恰有一端以源 uuid 存活");
            let survivor = &survivors[0];
            assert_eq!(survivor.pool_id, "p-dest");
            assert_eq!(survivor.state, "ready");
            assert_eq!(survivor.vm_id.as_deref(), Some("vm1"));
        }

        // 整批命令顺序：探测 → 准备 → 迁移
        let sent = runner.sent();
        let methods: Vec<&str> = sent.iter().map(|(_, c)| c.method()).collect();
        assert!(methods.contains(&"check_storage_availability"));
        assert!(methods.contains(&"prepare_for_migration"));
        let migrate_idx = methods.iter().position(|m| *m == "migrate_vm_with_storage").unwrap();
        let prepare_idx = methods.iter().position(|m| *m == "prepare_for_migration").unwrap();
        assert!(prepare_idx < migrate_idx);

        // NFS→NFS 整批增量标志
        let (_, migrate_cmd) = &sent[migrate_idx];
        match migrate_cmd {
            AgentCommand::MigrateVmWithStorage(req) => {
                assert!(req.incremental_on_shared_nfs);
                assert!(!req.windows_guest);
                assert!(!req.managed_storage);
                assert_eq!(req.disks.len(), 2);
                // NFS 间迁移的描述符源端来自连接路径
                for disk in req.disks.values() {
                    assert!(disk
                        .source_path
                        .as_deref()
                        .unwrap_or_default()
                        .starts_with("/mnt/connected/"));
                }
            }
            other => panic!("期望 MigrateVmWithStorage，收到 {}", other.method()),
        }
    }

    #[tokio::test]
    async fn test_failed_migration_destroys_destination() {
        let catalog = testkit::memory_catalog();
        let runner = testkit::scripted_runner();
        runner.fail_on("migrate_vm_with_storage");
        let selector = testkit::fixed_selector(Some(testkit::host_endpoint("n2")));
        let ctx = testkit::context(catalog.clone(), runner.clone(), selector);

        let job = nfs_job(&catalog).await;
        let outcome = execute(&ctx, &KvmMigrationHooks, &job).await;
        assert!(!outcome.success);

        // 不变式：失败时目标卷销毁，源卷保留（标记失败待外部处理）
        for src_id in ["va", "vb"] {
            let src = catalog.volume(src_id).await.unwrap().unwrap();
            assert!(src.removed_at.is_none(), "源卷记录应保留");
            assert_eq!(src.state, "failed");

            let dest_removed = catalog
                .all_volumes()
                .await
                .into_iter()
                .filter(|v| v.pool_id == "p-dest" && v.removed_at.is_some())
                .count();
            assert!(dest_removed >= 1, "目标卷应已打删除标记");
        }

        // 目标准备被回滚
        let rollbacks = runner
            .sent()
            .iter()
            .filter(|(_, c)| {
                matches!(c, AgentCommand::PrepareForMigration(r) if r.rollback)
            })
            .count();
        assert_eq!(rollbacks, 1);
    }

    #[tokio::test]
    async fn test_prepare_failure_is_fatal_for_batch() {
        let catalog = testkit::memory_catalog();
        let runner = testkit::scripted_runner();
        runner.fail_on("prepare_for_migration");
        let selector = testkit::fixed_selector(Some(testkit::host_endpoint("n2")));
        let ctx = testkit::context(catalog.clone(), runner.clone(), selector);

        let job = nfs_job(&catalog).await;
        let outcome = execute(&ctx, &KvmMigrationHooks, &job).await;
        assert!(!outcome.success);
        assert!(outcome.message.contains("目标宿主机准备失败"));

        // 不发迁移命令
        assert!(!runner
            .sent()
            .iter()
            .any(|(_, c)| c.method() == "migrate_vm_with_storage"));
    }

    #[tokio::test]
    async fn test_verify_rejects_managed_source() {
        let catalog = testkit::memory_catalog();
        let runner = testkit::scripted_runner();
        let selector = testkit::fixed_selector(Some(testkit::host_endpoint("n2")));
        let ctx = testkit::context(catalog.clone(), runner.clone(), selector);

        let managed_pool = testkit::pool_builder("p-src").pool_type("iscsi").managed(true).build();
        let dest_pool = testkit::pool_builder("p-dest").pool_type("iscsi").managed(true).build();
        let vol = testkit::volume_builder("v1", "p-src").build();
        catalog.add_volume(vol.clone()).await;

        let job = VmStorageMigrationJob {
            vm: testkit::vm_model("vm1", "vm-01", "n1", "linux"),
            src_host: testkit::host_endpoint("n1"),
            dest_host: testkit::host_endpoint("n2"),
            placements: vec![VolumePlacement {
                source: DataEntry::new(
                    DataObject::Volume(vol),
                    DataStore::from_pool(&managed_pool),
                ),
                dest_store: DataStore::from_pool(&dest_pool),
            }],
        };

        let outcome = execute(&ctx, &ArrayMigrationHooks, &job).await;
        assert!(!outcome.success);
        assert!(outcome.message.contains("非托管"));
        assert!(runner.sent().is_empty(), "预检失败前不应发出任何命令");
    }

    #[tokio::test]
    async fn test_verify_rejects_mixed_destinations() {
        let catalog = testkit::memory_catalog();
        let runner = testkit::scripted_runner();
        let selector = testkit::fixed_selector(Some(testkit::host_endpoint("n2")));
        let ctx = testkit::context(catalog.clone(), runner.clone(), selector);

        let src_pool = testkit::pool_builder("p-src").pool_type("nfs").build();
        let dest_a = testkit::pool_builder("p-a").pool_type("iscsi").managed(true).build();
        let dest_b = testkit::pool_builder("p-b")
            .pool_type("nfs")
            .scope("cluster")
            .scope_id("c2")
            .build();

        let mut placements = Vec::new();
        for (id, dest) in [("v1", &dest_a), ("v2", &dest_b)] {
            let vol = testkit::volume_builder(id, "p-src").build();
            catalog.add_volume(vol.clone()).await;
            placements.push(VolumePlacement {
                source: DataEntry::new(
                    DataObject::Volume(vol),
                    DataStore::from_pool(&src_pool),
                ),
                dest_store: DataStore::from_pool(dest),
            });
        }

        let job = VmStorageMigrationJob {
            vm: testkit::vm_model("vm1", "vm-01", "n1", "linux"),
            src_host: testkit::host_endpoint("n1"),
            dest_host: testkit::host_endpoint("n2"),
            placements,
        };

        let outcome = execute(&ctx, &ArrayMigrationHooks, &job).await;
        assert!(!outcome.success);
        assert!(outcome.message.contains("混合"));
    }

    #[tokio::test]
    async fn test_verify_rejects_zone_scoped_nfs_destination() {
        let catalog = testkit::memory_catalog();
        let runner = testkit::scripted_runner();
        let selector = testkit::fixed_selector(Some(testkit::host_endpoint("n2")));
        let ctx = testkit::context(catalog.clone(), runner.clone(), selector);

        let src_pool = testkit::pool_builder("p-src").pool_type("nfs").scope("cluster").scope_id("c1").build();
        let dest_pool = testkit::pool_builder("p-dest").pool_type("nfs").scope("zone").build();
        let vol = testkit::volume_builder("v1", "p-src").build();
        catalog.add_volume(vol.clone()).await;

        let job = VmStorageMigrationJob {
            vm: testkit::vm_model("vm1", "vm-01", "n1", "linux"),
            src_host: testkit::host_endpoint("n1"),
            dest_host: testkit::host_endpoint("n2"),
            placements: vec![VolumePlacement {
                source: DataEntry::new(
                    DataObject::Volume(vol),
                    DataStore::from_pool(&src_pool),
                ),
                dest_store: DataStore::from_pool(&dest_pool),
            }],
        };

        let outcome = execute(&ctx, &KvmMigrationHooks, &job).await;
        assert!(!outcome.success);
        assert!(outcome.message.contains("集群作用域"));
    }

    #[tokio::test]
    async fn test_shared_reachable_volume_skipped() {
        let catalog = testkit::memory_catalog();
        let runner = testkit::scripted_runner();
        let selector = testkit::fixed_selector(Some(testkit::host_endpoint("n2")));
        let ctx = testkit::context(catalog.clone(), runner.clone(), selector);

        // 源池 zone 级共享且目标池即源池：原地保留
        let shared_pool = testkit::pool_builder("p-shared").pool_type("nfs").scope("zone").build();
        catalog.add_pool(shared_pool.clone()).await;
        let vol = testkit::volume_builder("v1", "p-shared").build();
        catalog.add_volume(vol.clone()).await;

        let job = VmStorageMigrationJob {
            vm: testkit::vm_model("vm1", "vm-01", "n1", "linux"),
            src_host: testkit::host_endpoint("n1"),
            dest_host: testkit::host_endpoint("n2"),
            placements: vec![VolumePlacement {
                source: DataEntry::new(
                    DataObject::Volume(vol),
                    DataStore::from_pool(&shared_pool),
                ),
                dest_store: DataStore::from_pool(&shared_pool),
            }],
        };

        let outcome = execute(&ctx, &KvmMigrationHooks, &job).await;
        assert!(outcome.success);
        assert!(outcome.message.contains("无需迁移"));
        // 没有为该卷发准备/迁移命令
        assert!(!runner
            .sent()
            .iter()
            .any(|(_, c)| c.method() == "migrate_vm_with_storage"));
    }
}
