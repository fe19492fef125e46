/// KVM 文件存储迁移钩子
///
/// 基准钩子只认托管池；这套钩子支持 ROOT 卷位于非托管文件存储
/// （本地目录 / NFS）的 KVM 整机迁移，覆盖三处差异点：
/// 池准入谓词、磁盘描述符构造、目标端路径生成

use async_trait::async_trait;
use tracing::info;

use common::ws_rpc::{
    CopyObjectRequest, CreateObjectRequest, DiskDescriptor, DiskKind, MigrationOptionsDescriptor,
};
use common::{Error, Result};

use crate::db::models::volume;

use super::endpoint::HostEndpoint;
use super::object::{DataEntry, DataObject, DataStore};
use super::catalog::MotionCatalog;
use super::runner::{AgentAnswer, AgentCommand, CommandRunner};
use super::storage_system::{disk_format_or_default, MigrationHookSet};
use super::strategy::{StrategyPriority, VmStorageMigrationJob, VolumePlacement};
use super::MotionContext;

/// 目标宿主机上镜像目录的兜底位置
const DEFAULT_IMAGES_DIR: &str = "/var/lib/libvirt/images";

pub struct KvmMigrationHooks;

impl KvmMigrationHooks {
    fn is_kvm(host: &HostEndpoint) -> bool {
        matches!(host.hypervisor_type.as_deref(), Some("kvm") | Some("qemu"))
    }
}

#[async_trait]
impl MigrationHookSet for KvmMigrationHooks {
    fn name(&self) -> &'static str {
        "kvm"
    }

    fn pool_qualifies(&self, store: &DataStore) -> bool {
        // 只接非托管的文件协议池，托管池由基准钩子处理
        !store.managed && store.is_file_protocol()
    }

    fn vm_priority(&self, job: &VmStorageMigrationJob) -> StrategyPriority {
        let kvm_pair = Self::is_kvm(&job.src_host) && Self::is_kvm(&job.dest_host);
        let all_file_backed = job
            .placements
            .iter()
            .all(|p| self.pool_qualifies(&p.source.store) && self.pool_qualifies(&p.dest_store));

        if kvm_pair && all_file_backed && !job.placements.is_empty() {
            StrategyPriority::HypervisorSpecific
        } else {
            StrategyPriority::CantHandle
        }
    }

    fn build_disk_descriptor(
        &self,
        placement: &VolumePlacement,
        dest_path: Option<&str>,
        options: Option<MigrationOptionsDescriptor>,
    ) -> DiskDescriptor {
        DiskDescriptor {
            volume_uuid: placement.source.object.uuid().to_string(),
            disk_kind: DiskKind::File,
            format: Some(disk_format_or_default(placement.source.object.format())),
            path: dest_path.map(|p| p.to_string()),
            source_path: placement.source.object.path().map(|p| p.to_string()),
            backing_path: options.as_ref().and_then(|o| o.backing_path.clone()),
            migration: options,
        }
    }

    /// ROOT 卷按模板身份在目标宿主机上预置根盘，
    /// 路径由镜像目录与目标卷 uuid 拼接而来
    async fn prepare_destination_path(
        &self,
        ctx: &MotionContext,
        placement: &VolumePlacement,
        dup: &volume::Model,
        dest_host: &HostEndpoint,
    ) -> Result<Option<String>> {
        let volume = match &placement.source.object {
            DataObject::Volume(v) => v,
            _ => return Ok(None),
        };
        if volume.volume_kind != "root" {
            return Ok(None);
        }
        let Some(template_id) = &volume.template_id else {
            return Ok(None);
        };
        let template = ctx
            .catalog
            .template(template_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("模板不存在: {}", template_id)))?;

        let dup_entry = DataEntry::new(DataObject::Volume(dup.clone()), placement.dest_store.clone());
        let command = AgentCommand::Create(CreateObjectRequest {
            object: dup_entry.descriptor(),
            template_uuid: Some(template.uuid.clone()),
            wait_secs: ctx.config.storage_pool_max_wait_secs,
        });

        match ctx.runner.send(&dest_host.node_id, command).await {
            AgentAnswer::Create(resp) if resp.success => {
                let images_dir = placement
                    .dest_store
                    .path
                    .clone()
                    .unwrap_or_else(|| DEFAULT_IMAGES_DIR.to_string());
                let path = format!("{}/{}", images_dir.trim_end_matches('/'), dup.uuid);
                info!("目标根盘已预置: volume={}, path={}", dup.uuid, path);
                Ok(Some(path))
            }
            other => Err(Error::Remote(format!("目标根盘预置失败: {}", other.message()))),
        }
    }

    /// 链接克隆场景下把基础模板预拷到目标文件存储
    async fn pre_copy_template(
        &self,
        ctx: &MotionContext,
        placement: &VolumePlacement,
        dest_host: &HostEndpoint,
    ) -> Result<()> {
        let volume = match &placement.source.object {
            DataObject::Volume(v) => v,
            _ => return Ok(()),
        };
        let Some(template_id) = &volume.template_id else {
            return Ok(());
        };

        // 目标池上已有落位记录则无需预拷
        if ctx
            .catalog
            .template_ref_on_pool(template_id, &placement.dest_store.id)
            .await?
            .is_some()
        {
            return Ok(());
        }

        let template = ctx
            .catalog
            .template(template_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("模板不存在: {}", template_id)))?;
        let template_pool = ctx
            .catalog
            .pool(&template.pool_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("存储池不存在: {}", template.pool_id)))?;
        let template_store = DataStore::from_pool(&template_pool);
        let template_entry = DataEntry::new(DataObject::Template(template), template_store);

        let mut dest_desc = template_entry.descriptor();
        dest_desc.path = None;
        dest_desc.store = placement.dest_store.descriptor();

        info!(
            "预拷贝基础模板: template={}, dest_pool={}",
            template_entry.object.uuid(),
            placement.dest_store.id
        );

        let command = AgentCommand::Copy(CopyObjectRequest {
            src: template_entry.descriptor(),
            dest: dest_desc,
            wait_secs: ctx.config.download_wait_secs,
            execute_in_sequence: ctx.config.execute_in_sequence,
            options: Default::default(),
        });

        match ctx.runner.send(&dest_host.node_id, command).await {
            AgentAnswer::Copy(resp) if resp.success => Ok(()),
            other => Err(Error::Remote(format!("模板预拷贝失败: {}", other.message()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motion::testkit;

    fn placement(src_pool_type: &str, dest_pool_type: &str, managed: bool) -> VolumePlacement {
        let src_pool = testkit::pool_builder("p1").pool_type(src_pool_type).build();
        let dest_pool = testkit::pool_builder("p2")
            .pool_type(dest_pool_type)
            .managed(managed)
            .build();
        VolumePlacement {
            source: DataEntry::new(
                DataObject::Volume(testkit::volume_builder("v1", "p1").build()),
                DataStore::from_pool(&src_pool),
            ),
            dest_store: DataStore::from_pool(&dest_pool),
        }
    }

    fn job(placements: Vec<VolumePlacement>) -> VmStorageMigrationJob {
        VmStorageMigrationJob {
            vm: testkit::vm_model("vm1", "vm-01", "n1", "linux"),
            src_host: testkit::host_endpoint("n1"),
            dest_host: testkit::host_endpoint("n2"),
            placements,
        }
    }

    #[test]
    fn test_pool_qualifies_file_backed_only() {
        let hooks = KvmMigrationHooks;
        let nfs = DataStore::from_pool(&testkit::pool_builder("p1").pool_type("nfs").build());
        let local = DataStore::from_pool(
            &testkit::pool_builder("p2").pool_type("filesystem").build(),
        );
        let managed =
            DataStore::from_pool(&testkit::pool_builder("p3").pool_type("iscsi").managed(true).build());
        let lvm = DataStore::from_pool(&testkit::pool_builder("p4").pool_type("lvm").build());

        assert!(hooks.pool_qualifies(&nfs));
        assert!(hooks.pool_qualifies(&local));
        assert!(!hooks.pool_qualifies(&managed));
        assert!(!hooks.pool_qualifies(&lvm));
    }

    #[test]
    fn test_vm_priority_hypervisor_specific() {
        let hooks = KvmMigrationHooks;
        let j = job(vec![placement("nfs", "nfs", false)]);
        assert_eq!(hooks.vm_priority(&j), StrategyPriority::HypervisorSpecific);

        // 任一池不合格即拒绝
        let j = job(vec![placement("nfs", "iscsi", true)]);
        assert_eq!(hooks.vm_priority(&j), StrategyPriority::CantHandle);
    }

    #[test]
    fn test_disk_descriptor_is_file_kind() {
        let hooks = KvmMigrationHooks;
        let p = placement("nfs", "nfs", false);
        let desc = hooks.build_disk_descriptor(&p, Some("/var/lib/libvirt/images/u-1"), None);
        assert_eq!(desc.disk_kind, DiskKind::File);
        assert_eq!(desc.path.as_deref(), Some("/var/lib/libvirt/images/u-1"));
        assert!(desc.source_path.is_some());
    }

    #[tokio::test]
    async fn test_prepare_destination_path_for_root_volume() {
        let catalog = testkit::memory_catalog();
        catalog.add_template(testkit::template_builder("t1", "img1").build()).await;

        let runner = testkit::scripted_runner();
        let selector = testkit::fixed_selector(Some(testkit::host_endpoint("n2")));
        let ctx = testkit::context(catalog.clone(), runner.clone(), selector);

        let src_pool = testkit::pool_builder("p1").pool_type("nfs").build();
        let dest_pool = testkit::pool_builder("p2")
            .pool_type("nfs")
            .path("/mnt/dest-images")
            .build();
        let p = VolumePlacement {
            source: DataEntry::new(
                DataObject::Volume(
                    testkit::volume_builder("v1", "p1")
                        .volume_kind("root")
                        .template_id("t1")
                        .build(),
                ),
                DataStore::from_pool(&src_pool),
            ),
            dest_store: DataStore::from_pool(&dest_pool),
        };
        let dup = testkit::volume_builder("dup1", "p2").uuid("dup-uuid").build();

        let hooks = KvmMigrationHooks;
        let path = hooks
            .prepare_destination_path(&ctx, &p, &dup, &testkit::host_endpoint("n2"))
            .await
            .unwrap();
        assert_eq!(path.as_deref(), Some("/mnt/dest-images/dup-uuid"));

        // 创建命令发给目标宿主机并携带模板身份
        let sent = runner.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "n2");
        match &sent[0].1 {
            AgentCommand::Create(req) => {
                assert_eq!(req.template_uuid.as_deref(), Some("uuid-t1"));
            }
            other => panic!("期望 Create，收到 {}", other.method()),
        }
    }

    #[tokio::test]
    async fn test_data_volume_needs_no_destination_path() {
        let catalog = testkit::memory_catalog();
        let runner = testkit::scripted_runner();
        let selector = testkit::fixed_selector(None);
        let ctx = testkit::context(catalog, runner.clone(), selector);

        let p = placement("nfs", "nfs", false);
        let dup = testkit::volume_builder("dup1", "p2").build();

        let hooks = KvmMigrationHooks;
        let path = hooks
            .prepare_destination_path(&ctx, &p, &dup, &testkit::host_endpoint("n2"))
            .await
            .unwrap();
        assert!(path.is_none());
        assert!(runner.sent().is_empty());
    }
}
