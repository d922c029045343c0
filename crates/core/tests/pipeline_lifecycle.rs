//! End-to-end orchestrator tests against mock collaborators.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use preserva_core::aps::{ApsClient, ApsError, PackageStatus};
use preserva_core::cms::{Node, NodeCollection, UserClient};
use preserva_core::config::{AtomConfig, Config, PreservationConfig};
use preserva_core::preserver::{PreserveError, Preserver};
use preserva_core::service::{PreserveRunner, RequestService, ServiceArgs, ServiceError};
use preserva_core::testing::{MockAds, MockCms, MockTransferRpc};

const PACKAGE_PATH: &str = "personal-files/pkg";
const PRESERVATION_TAG: &str = "usermeta-preservation-status";
const DIP_TAG: &str = "usermeta-dip-status";

struct Harness {
    base: tempfile::TempDir,
    cms: Arc<MockCms>,
    rpc: Arc<MockTransferRpc>,
    ads: Arc<MockAds>,
    preserver: Preserver<MockCms, Arc<MockTransferRpc>, MockAds>,
    processing_dir: PathBuf,
    completed_dir: PathBuf,
    dips_dir: PathBuf,
}

fn write_zip(path: &std::path::Path, entries: &[(&str, &[u8])]) {
    let file = std::fs::File::create(path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    for (name, contents) in entries {
        writer
            .start_file(*name, zip::write::FileOptions::default())
            .unwrap();
        writer.write_all(contents).unwrap();
    }
    writer.finish().unwrap();
}

fn test_config(base: &std::path::Path) -> Config {
    Config {
        a3m_address: "localhost:7000".to_string(),
        a3m_completed_dir: base.join("completed"),
        a3m_dips_dir: base.join("dips"),
        cells_address: "https://localhost:8080".to_string(),
        cells_admin_token: "admin-token".to_string(),
        cells_archive_workspace: "common-files".to_string(),
        cells_cec_path: PathBuf::from("/usr/local/bin/cec"),
        cleanup: true,
        atom_config_path: None,
        premis_organization: String::new(),
        allow_insecure_tls: false,
        log_level: "info".to_string(),
        log_file_path: None,
        processing_base_dir: base.join("processing"),
    }
}

fn complete_atom() -> AtomConfig {
    AtomConfig {
        host: "https://atom.example.org".to_string(),
        api_key: "key".to_string(),
        login_email: "a@example.org".to_string(),
        login_password: "secret".to_string(),
        rsync_target: "atom@host:/dips/".to_string(),
        rsync_command: String::new(),
        slug: String::new(),
    }
}

fn harness_with_meta(parent_meta: &[(&str, &str)]) -> Harness {
    let base = tempfile::tempdir().unwrap();
    let processing_dir = base.path().join("processing");
    let completed_dir = base.path().join("completed");
    let dips_dir = base.path().join("dips");
    let aip_source = base.path().join("aip_source");
    for dir in [&processing_dir, &completed_dir, &dips_dir, &aip_source] {
        std::fs::create_dir_all(dir).unwrap();
    }
    std::fs::create_dir_all(aip_source.join("objects/data")).unwrap();
    std::fs::write(aip_source.join("objects/data/a.txt"), b"hi").unwrap();

    let payload = base.path().join("pkg.zip");
    write_zip(&payload, &[("pkg/a.txt", b"hi")]);

    let cms = Arc::new(MockCms::new());
    cms.set_collection(
        PACKAGE_PATH,
        NodeCollection {
            parent: Node {
                uuid: "parent-uuid".to_string(),
                path: "personal/admin/pkg".to_string(),
                meta_store: parent_meta
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            },
            children: vec![],
        },
    );
    cms.set_payload(PACKAGE_PATH, payload);

    let rpc = Arc::new(MockTransferRpc::new());
    rpc.set_fixed_id("u1");
    rpc.script_statuses(vec![
        PackageStatus::Processing as i32,
        PackageStatus::Complete as i32,
    ]);
    rpc.materialise_outputs(completed_dir.clone(), dips_dir.clone(), aip_source);

    let ads = Arc::new(MockAds::new());
    let config = Arc::new(test_config(base.path()));
    let preserver = Preserver::new(
        Arc::clone(&cms),
        ApsClient::new(Arc::clone(&rpc)),
        Arc::clone(&ads),
        config,
    );

    Harness {
        base,
        cms,
        rpc,
        ads,
        preserver,
        processing_dir,
        completed_dir,
        dips_dir,
    }
}

fn harness() -> Harness {
    harness_with_meta(&[])
}

async fn user(harness: &Harness) -> UserClient {
    harness.preserver.user_client("admin").await.unwrap()
}

async fn run(
    harness: &Harness,
    pcfg: &PreservationConfig,
    atom: &AtomConfig,
    cleanup: bool,
) -> Result<(), PreserveError> {
    let token = CancellationToken::new();
    let user = user(harness).await;
    harness
        .preserver
        .run(&token, pcfg, atom, &user, PACKAGE_PATH, cleanup, false)
        .await
}

#[tokio::test(start_paused = true)]
async fn happy_path_passes_tags_in_order_and_cleans_up() {
    let harness = harness();
    run(&harness, &PreservationConfig::default(), &AtomConfig::default(), true)
        .await
        .unwrap();

    assert_eq!(
        harness.cms.tag_values(PRESERVATION_TAG),
        vec![
            "🟢 Starting...",
            "🌐 Downloading...",
            "🗂️ Preprocessing...",
            "📦 Packaging...",
            "🗃️ Extracting...",
            "🌐 Uploading...",
            "🔒 Preserved",
        ]
    );

    // The extracted AIP directory was uploaded to the archive workspace.
    let uploads = harness.cms.uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].1, "common-files/pkg-u1");

    // No DIP delivery without a slug.
    assert!(harness.ads.deposits().is_empty());
    assert!(harness.ads.migrated().is_empty());

    // Cleanup removed the AIP, the DIP directory and the processing dir.
    assert!(!harness.completed_dir.join("pkg-u1.7z").exists());
    assert!(!harness.dips_dir.join("u1").exists());
    assert_eq!(std::fs::read_dir(&harness.processing_dir).unwrap().count(), 0);
}

#[tokio::test(start_paused = true)]
async fn compress_aip_adds_the_compressing_stage() {
    let harness = harness();
    let pcfg = PreservationConfig {
        compress_aip: true,
        ..PreservationConfig::default()
    };
    run(&harness, &pcfg, &AtomConfig::default(), true).await.unwrap();

    let tags = harness.cms.tag_values(PRESERVATION_TAG);
    assert!(tags.contains(&"🗃️ Compressing...".to_string()));

    let uploads = harness.cms.uploads();
    assert_eq!(uploads[0].1, "common-files/pkg-u1.zip");
}

#[tokio::test(start_paused = true)]
async fn aps_failure_carries_job_diagnostics_and_tags_failed() {
    let harness = harness();
    harness.rpc.script_statuses(vec![PackageStatus::Failed as i32]);
    harness.rpc.set_terminal_jobs(vec![preserva_core::aps::proto::Job {
        id: "j1".to_string(),
        name: "normalize".to_string(),
        link_id: "l1".to_string(),
        status: preserva_core::aps::proto::job::Status::Failed as i32,
    }]);

    let err = run(&harness, &PreservationConfig::default(), &AtomConfig::default(), true)
        .await
        .unwrap_err();
    match err {
        PreserveError::Aps(ApsError::Failed { jobs, .. }) => {
            assert_eq!(jobs.len(), 1);
            assert_eq!(jobs[0].job_name, "normalize");
            assert_eq!(jobs[0].job_id, "j1");
        }
        other => panic!("expected APS failure, got {other:?}"),
    }

    let tags = harness.cms.tag_values(PRESERVATION_TAG);
    assert!(tags.last().unwrap().starts_with("❌ Failed: "), "tags: {tags:?}");
    // No AIP was produced for the failed package.
    assert_eq!(std::fs::read_dir(&harness.completed_dir).unwrap().count(), 0);
}

#[tokio::test(start_paused = true)]
async fn dip_branch_migrates_deposits_and_records_the_slug() {
    let harness = harness_with_meta(&[("usermeta-atom-slug", "\"my-slug\"")]);
    run(&harness, &PreservationConfig::default(), &complete_atom(), true)
        .await
        .unwrap();

    assert_eq!(
        harness.cms.tag_values(DIP_TAG),
        vec!["⏳ Waiting...", "🚚 Migrating...", "📨 Depositing...", "✅ Deposited"]
    );
    assert_eq!(harness.ads.migrated(), vec![harness.dips_dir.join("u1")]);
    assert_eq!(
        harness.ads.deposits(),
        vec![("my-slug".to_string(), "u1".to_string())]
    );
    assert_eq!(
        harness.cms.tag_values("usermeta-atom-slug"),
        vec!["my-slug"]
    );
    assert_eq!(
        harness.cms.tag_values(PRESERVATION_TAG).last().unwrap(),
        "🔒 Preserved"
    );
}

#[tokio::test(start_paused = true)]
async fn request_slug_is_used_when_node_has_none() {
    let harness = harness();
    let mut atom = complete_atom();
    atom.slug = "request-slug".to_string();
    run(&harness, &PreservationConfig::default(), &atom, true).await.unwrap();

    assert_eq!(
        harness.ads.deposits(),
        vec![("request-slug".to_string(), "u1".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn dip_failure_sets_both_failure_tags() {
    let harness = harness_with_meta(&[("usermeta-atom-slug", "\"my-slug\"")]);
    harness.ads.set_fail_deposit(true);

    let err = run(&harness, &PreservationConfig::default(), &complete_atom(), true)
        .await
        .unwrap_err();
    assert!(matches!(err, PreserveError::Dip(_)), "got {err:?}");

    let dip_tags = harness.cms.tag_values(DIP_TAG);
    assert!(
        dip_tags.last().unwrap().starts_with("❌ DIP Failed: "),
        "dip tags: {dip_tags:?}"
    );
    assert_eq!(
        harness.cms.tag_values(PRESERVATION_TAG).last().unwrap(),
        "❌ DIP Failed"
    );
}

#[tokio::test(start_paused = true)]
async fn failed_upload_verification_still_cleans_up() {
    let harness = harness();
    harness.cms.set_fail_upload_stat(true);

    let err = run(&harness, &PreservationConfig::default(), &AtomConfig::default(), true)
        .await
        .unwrap_err();
    assert!(matches!(err, PreserveError::UploadVerify { .. }), "got {err:?}");

    let tags = harness.cms.tag_values(PRESERVATION_TAG);
    assert!(tags.last().unwrap().starts_with("❌ Failed: "));

    assert!(!harness.completed_dir.join("pkg-u1.7z").exists());
    assert!(!harness.dips_dir.join("u1").exists());
    assert_eq!(std::fs::read_dir(&harness.processing_dir).unwrap().count(), 0);
}

#[tokio::test(start_paused = true)]
async fn cleanup_false_keeps_intermediate_artefacts() {
    let harness = harness();
    run(&harness, &PreservationConfig::default(), &AtomConfig::default(), false)
        .await
        .unwrap();

    assert!(harness.completed_dir.join("pkg-u1.7z").exists());
    assert!(harness.dips_dir.join("u1").is_dir());
    assert_eq!(std::fs::read_dir(&harness.processing_dir).unwrap().count(), 1);
}

#[tokio::test(start_paused = true)]
async fn legacy_progress_namespace_is_honoured() {
    let harness = harness_with_meta(&[("usermeta-a3m-progress", "🔒 Preserved")]);
    run(&harness, &PreservationConfig::default(), &AtomConfig::default(), true)
        .await
        .unwrap();

    assert!(harness.cms.tag_values(PRESERVATION_TAG).is_empty());
    assert_eq!(
        harness.cms.tag_values("usermeta-a3m-progress").last().unwrap(),
        "🔒 Preserved"
    );
}

#[tokio::test(start_paused = true)]
async fn stale_dip_tag_is_cleared_when_delivery_is_skipped() {
    let harness = harness_with_meta(&[(DIP_TAG, "✅ Deposited")]);
    run(&harness, &PreservationConfig::default(), &AtomConfig::default(), true)
        .await
        .unwrap();

    assert_eq!(harness.cms.tag_values(DIP_TAG), vec![""]);
}

#[tokio::test(start_paused = true)]
async fn cancellation_aborts_the_pipeline_and_still_cleans_up() {
    let harness = harness();
    let token = CancellationToken::new();
    token.cancel();
    let user = user(&harness).await;

    let err = harness
        .preserver
        .run(
            &token,
            &PreservationConfig::default(),
            &AtomConfig::default(),
            &user,
            PACKAGE_PATH,
            true,
            false,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PreserveError::Preprocess(_)), "got {err:?}");

    assert_eq!(std::fs::read_dir(&harness.processing_dir).unwrap().count(), 0);
    let tags = harness.cms.tag_values(PRESERVATION_TAG);
    assert!(tags.last().unwrap().starts_with("❌ Failed: "), "tags: {tags:?}");
}

#[tokio::test(start_paused = true)]
async fn two_paths_in_one_request_are_serialised_at_the_aps() {
    let harness = harness();
    // Register a second, independent package.
    let other_payload = harness.base.path().join("pkg2.zip");
    write_zip(&other_payload, &[("pkg2/b.txt", b"there")]);
    harness.cms.set_collection(
        "personal-files/pkg2",
        NodeCollection {
            parent: Node {
                uuid: "parent2-uuid".to_string(),
                path: "personal/admin/pkg2".to_string(),
                meta_store: Default::default(),
            },
            children: vec![],
        },
    );
    harness.cms.set_payload("personal-files/pkg2", other_payload);
    harness.rpc.script_statuses_per_package(vec![
        vec![PackageStatus::Processing as i32, PackageStatus::Complete as i32],
        vec![PackageStatus::Complete as i32],
    ]);

    let rpc = Arc::clone(&harness.rpc);
    let cms = Arc::clone(&harness.cms);
    let service = RequestService::new(harness.preserver);
    let args = ServiceArgs {
        username: "admin".to_string(),
        paths: vec![PACKAGE_PATH.to_string(), "personal-files/pkg2".to_string()],
        cleanup: true,
        ..ServiceArgs::default()
    };
    service.run_args(CancellationToken::new(), args).await.unwrap();

    // Both packages preserved, but never more than one outstanding
    // submission against the processing service.
    assert_eq!(rpc.max_concurrent_outstanding(), 1);
    let preserved = cms
        .tag_values(PRESERVATION_TAG)
        .iter()
        .filter(|t| *t == "🔒 Preserved")
        .count();
    assert_eq!(preserved, 2);
}

#[tokio::test(start_paused = true)]
async fn service_aggregates_path_failures() {
    let harness = harness();
    // Second path has no payload registered: the pipeline fails for it.
    harness.cms.set_collection(
        "personal-files/missing",
        NodeCollection {
            parent: Node {
                uuid: "other-uuid".to_string(),
                path: "personal/admin/missing".to_string(),
                meta_store: Default::default(),
            },
            children: vec![],
        },
    );

    let service = RequestService::new(harness.preserver);
    let args = ServiceArgs {
        username: "admin".to_string(),
        paths: vec![PACKAGE_PATH.to_string(), "personal-files/missing".to_string()],
        cleanup: true,
        ..ServiceArgs::default()
    };

    let err = service
        .run_args(CancellationToken::new(), args)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::PreservationFailed));

    // The healthy path still finished.
    assert_eq!(
        harness.cms.tag_values(PRESERVATION_TAG).last().unwrap(),
        "🔒 Preserved"
    );
    drop(harness.base);
}
