//! Scripted transfer-service RPC for tests.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::aps::proto::{Job, Task};
use crate::aps::{
    ListTasksRequest, ListTasksResponse, PackageStatus, ReadRequest, ReadResponse, SubmitRequest,
    SubmitResponse, TransferRpc,
};

struct PackageState {
    name: String,
    script: VecDeque<i32>,
    terminated: bool,
}

#[derive(Default)]
struct RpcState {
    default_script: Vec<i32>,
    per_package: VecDeque<Vec<i32>>,
    packages: HashMap<String, PackageState>,
    submitted: Vec<SubmitRequest>,
    terminal_jobs: Vec<Job>,
    tasks: Vec<Task>,
    next_id: u32,
    fixed_id: Option<String>,
    completed_dir: Option<PathBuf>,
    dips_dir: Option<PathBuf>,
    aip_source: Option<PathBuf>,
}

/// Mock transfer service.
///
/// Each submission is assigned an id and walks through a scripted status
/// sequence on successive `Read` calls; the last status repeats. On
/// completion the mock can materialise a real AIP archive and DIP directory
/// the way the production service would, so the orchestrator's
/// post-processing runs against actual files.
pub struct MockTransferRpc {
    state: Mutex<RpcState>,
    outstanding: AtomicUsize,
    max_outstanding: AtomicUsize,
}

impl Default for MockTransferRpc {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransferRpc {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RpcState {
                default_script: vec![PackageStatus::Complete as i32],
                ..RpcState::default()
            }),
            outstanding: AtomicUsize::new(0),
            max_outstanding: AtomicUsize::new(0),
        }
    }

    /// Status sequence every package walks through.
    pub fn script_statuses(&self, statuses: Vec<i32>) {
        self.state.lock().unwrap().default_script = statuses;
    }

    /// Per-submission status sequences, popped in submission order.
    pub fn script_statuses_per_package(&self, scripts: Vec<Vec<i32>>) {
        self.state.lock().unwrap().per_package = scripts.into();
    }

    /// Jobs reported alongside any terminal status.
    pub fn set_terminal_jobs(&self, jobs: Vec<Job>) {
        self.state.lock().unwrap().terminal_jobs = jobs;
    }

    /// Tasks returned for any `ListTasks` call.
    pub fn set_tasks(&self, tasks: Vec<Task>) {
        self.state.lock().unwrap().tasks = tasks;
    }

    /// Makes every submission return the same package id.
    pub fn set_fixed_id(&self, id: impl Into<String>) {
        self.state.lock().unwrap().fixed_id = Some(id.into());
    }

    /// Configures on-disk output: on completion the contents of
    /// `aip_source` are packed into `<completed_dir>/<name>-<id>.7z` and a
    /// DIP directory is created under `dips_dir`.
    pub fn materialise_outputs(
        &self,
        completed_dir: PathBuf,
        dips_dir: PathBuf,
        aip_source: PathBuf,
    ) {
        let mut state = self.state.lock().unwrap();
        state.completed_dir = Some(completed_dir);
        state.dips_dir = Some(dips_dir);
        state.aip_source = Some(aip_source);
    }

    /// All submit requests seen so far.
    pub fn submitted(&self) -> Vec<SubmitRequest> {
        self.state.lock().unwrap().submitted.clone()
    }

    /// Highest number of packages that were between `Submit` and a terminal
    /// `Read` at the same time.
    pub fn max_concurrent_outstanding(&self) -> usize {
        self.max_outstanding.load(Ordering::SeqCst)
    }

    fn is_terminal(status: i32) -> bool {
        status == PackageStatus::Complete as i32
            || status == PackageStatus::Failed as i32
            || status == PackageStatus::Rejected as i32
    }

    // The mock AIP is a ZIP container under a `.7z` name: extraction
    // dispatches on magic bytes, so the extension never matters. The
    // archive carries a single top-level `<name>-<id>` directory the way
    // the real service lays its AIPs out.
    fn materialise(state: &RpcState, name: &str, id: &str) {
        if let (Some(completed), Some(source)) = (&state.completed_dir, &state.aip_source) {
            let dest = completed.join(format!("{name}-{id}.7z"));
            let file = std::fs::File::create(&dest).expect("failed to create mock AIP");
            let mut writer = zip::ZipWriter::new(file);
            let root = format!("{name}-{id}");
            writer
                .add_directory(format!("{root}/"), zip::write::FileOptions::default())
                .expect("failed to build mock AIP");
            for entry in walkdir::WalkDir::new(source) {
                let entry = entry.expect("failed to walk mock AIP source");
                let rel = entry.path().strip_prefix(source).expect("walk escaped source");
                if rel.as_os_str().is_empty() {
                    continue;
                }
                let entry_name = format!("{root}/{}", rel.to_string_lossy());
                if entry.file_type().is_dir() {
                    writer
                        .add_directory(format!("{entry_name}/"), zip::write::FileOptions::default())
                        .expect("failed to add mock AIP directory");
                } else {
                    writer
                        .start_file(&entry_name, zip::write::FileOptions::default())
                        .expect("failed to add mock AIP file");
                    let mut reader =
                        std::fs::File::open(entry.path()).expect("failed to read mock AIP file");
                    std::io::copy(&mut reader, &mut writer).expect("failed to copy mock AIP file");
                }
            }
            writer.finish().expect("failed to finish mock AIP");
        }
        if let Some(dips) = &state.dips_dir {
            let dip = dips.join(id);
            std::fs::create_dir_all(dip.join("objects")).expect("failed to build mock DIP");
            std::fs::write(dip.join("objects/access.txt"), b"dip contents")
                .expect("failed to write mock DIP file");
        }
    }
}

#[async_trait]
impl TransferRpc for MockTransferRpc {
    async fn submit(&self, request: SubmitRequest) -> Result<SubmitResponse, tonic::Status> {
        let mut state = self.state.lock().unwrap();
        let id = match state.fixed_id.clone() {
            Some(id) => id,
            None => {
                state.next_id += 1;
                format!("pkg-{}", state.next_id)
            }
        };
        let script = state
            .per_package
            .pop_front()
            .unwrap_or_else(|| state.default_script.clone());
        state.packages.insert(
            id.clone(),
            PackageState {
                name: request.name.clone(),
                script: script.into(),
                terminated: false,
            },
        );
        state.submitted.push(request);

        let outstanding = self.outstanding.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_outstanding.fetch_max(outstanding, Ordering::SeqCst);

        Ok(SubmitResponse { id })
    }

    async fn read(&self, request: ReadRequest) -> Result<ReadResponse, tonic::Status> {
        let mut state = self.state.lock().unwrap();

        let (status, name, newly_terminal) = {
            let package = state
                .packages
                .get_mut(&request.id)
                .ok_or_else(|| tonic::Status::not_found("unknown package"))?;
            let status = if package.script.len() > 1 {
                package.script.pop_front().unwrap_or(PackageStatus::Complete as i32)
            } else {
                package
                    .script
                    .front()
                    .copied()
                    .unwrap_or(PackageStatus::Complete as i32)
            };
            let newly_terminal = Self::is_terminal(status) && !package.terminated;
            if newly_terminal {
                package.terminated = true;
            }
            (status, package.name.clone(), newly_terminal)
        };

        if newly_terminal {
            self.outstanding.fetch_sub(1, Ordering::SeqCst);
            if status == PackageStatus::Complete as i32 {
                Self::materialise(&state, &name, &request.id);
            }
        }

        let jobs = if Self::is_terminal(status) {
            state.terminal_jobs.clone()
        } else {
            Vec::new()
        };

        Ok(ReadResponse { status, jobs })
    }

    async fn list_tasks(
        &self,
        _request: ListTasksRequest,
    ) -> Result<ListTasksResponse, tonic::Status> {
        Ok(ListTasksResponse {
            tasks: self.state.lock().unwrap().tasks.clone(),
        })
    }
}
