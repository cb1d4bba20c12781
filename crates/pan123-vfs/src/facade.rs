//! Filesystem facade
//!
//! [`Pan123Fs`] implements the host filesystem contract over the API
//! client, the resolver, and the upload/download engines. One facade is
//! tied to one configured root (folder ID plus optional path); it owns
//! the directory cache, the token state, and the pacer set through the
//! client it was built with.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use pan123_api::client::{endpoints, error_means_duplicate, ApiClient};
use pan123_api::download::Downloader;
use pan123_api::pacer::PacerKind;
use pan123_api::types::{RenameRequest, TrashRequest, UserInfoData};
use pan123_api::upload::{DuplicatePolicy, Uploader};
use pan123_core::config::Config;
use pan123_core::domain::entry::{Object, RemoteEntry, STATUS_REJECTED};
use pan123_core::domain::name::clean_name;
use pan123_core::domain::newtypes::{FileId, RemotePath};
use pan123_core::ports::token_store::TokenStore;
use pan123_core::ports::vfs::{
    ByteStream, ContentSource, Features, OpenOptions, OpenRange, RemoteFs, SourceInfo, Usage,
};
use pan123_core::{BackendError, Result};

use crate::dircache::CachedLeaf;
use crate::naming::generate_unique_name;
use crate::resolver::Resolver;

/// Safety bound on purge iterations
pub const PURGE_ITERATION_LIMIT: u32 = 10_000;

/// The filesystem facade over one 123Pan account root
pub struct Pan123Fs {
    root_path: RemotePath,
    root_id: FileId,
    client: Arc<ApiClient>,
    resolver: Arc<Resolver>,
    uploader: Uploader,
    downloader: Downloader,
}

impl Pan123Fs {
    /// Builds a facade anchored at the configured folder ID
    pub async fn new(config: Config, store: Arc<dyn TokenStore>) -> Result<Arc<Self>> {
        Self::new_rooted(config, store, RemotePath::root()).await
    }

    /// Builds a facade anchored at a path below the configured folder ID.
    ///
    /// If the path resolves to a file, construction fails with
    /// [`BackendError::IsFile`]; the host re-creates the facade at the
    /// parent and addresses the file by name.
    pub async fn new_rooted(
        mut config: Config,
        store: Arc<dyn TokenStore>,
        root_path: RemotePath,
    ) -> Result<Arc<Self>> {
        if config.token.is_none() {
            config.token = store.load().await?;
        }
        let client = Arc::new(ApiClient::new(&config, store)?);
        Self::with_client(config, client, root_path).await
    }

    /// Builds a facade over an existing client (tests point the client at
    /// a mock server first)
    pub async fn with_client(
        config: Config,
        client: Arc<ApiClient>,
        root_path: RemotePath,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let root_id = config.root_folder()?;
        let resolver = Arc::new(Resolver::new(Arc::clone(&client), config.encoding));
        let uploader = Uploader::new(Arc::clone(&client), config.effective_max_upload_parts());
        let downloader = Downloader::new(Arc::clone(&client));

        let fs = Self {
            root_path,
            root_id,
            client,
            resolver,
            uploader,
            downloader,
        };
        fs.check_root_kind().await?;
        Ok(Arc::new(fs))
    }

    /// Rejects a root path that names a file rather than a directory.
    ///
    /// The probe is authoritative; file-looking extensions are not
    /// trusted on their own since extensionless files exist.
    async fn check_root_kind(&self) -> Result<()> {
        let Some((parent_rel, leaf)) = self.root_path.parent_and_leaf() else {
            return Ok(());
        };
        match self.resolver.resolve_dir(self.root_id, &parent_rel).await {
            Ok(parent_id) => {
                if let Some(existing) = self.resolver.find_leaf(parent_id, leaf).await? {
                    if !existing.is_dir {
                        return Err(BackendError::IsFile(self.root_path.to_string()));
                    }
                }
                Ok(())
            }
            // A root that does not exist yet is fine; it is created on
            // first write.
            Err(BackendError::NotFound(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// The resolver, exposed for the backend commands
    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// The downloader, exposed for the backend commands
    pub fn downloader(&self) -> &Downloader {
        &self.downloader
    }

    fn abs(&self, rel: &RemotePath) -> RemotePath {
        self.root_path.join_path(rel)
    }

    async fn dir_id(&self, rel: &RemotePath) -> Result<FileId> {
        self.resolver.resolve_dir(self.root_id, &self.abs(rel)).await
    }

    /// Trashes a set of IDs
    async fn trash(&self, ids: Vec<i64>, kind: Option<PacerKind>) -> Result<()> {
        self.client
            .post_empty(endpoints::TRASH, &TrashRequest { file_ids: ids }, kind)
            .await
    }

    /// Renames in place, treating "already exists" as success when the
    /// file in fact landed under the wanted name
    async fn rename_checked(&self, id: FileId, parent: FileId, new_name: &str) -> Result<()> {
        let request = RenameRequest {
            file_id: id.as_i64(),
            file_name: self.resolver.encode_name(new_name),
        };
        match self.client.put_empty(endpoints::RENAME, &request).await {
            Ok(()) => Ok(()),
            Err(err) if error_means_duplicate(&err) => {
                match self.resolver.find_leaf_forced(parent, new_name).await? {
                    Some(leaf) if leaf.id == id => {
                        debug!(%id, new_name, "rename conflict but file already in place");
                        Ok(())
                    }
                    _ => Err(err),
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Moves into a parent, cross-checking conflicts against the actual
    /// post-condition
    async fn move_checked(&self, id: FileId, dst_parent: FileId, current_name: &str) -> Result<()> {
        let request = pan123_api::types::MoveRequest {
            file_ids: vec![id.as_i64()],
            to_parent_file_id: dst_parent.as_i64(),
        };
        match self
            .client
            .post_empty(endpoints::MOVE, &request, None)
            .await
        {
            Ok(()) => Ok(()),
            Err(err) if error_means_duplicate(&err) => {
                match self.resolver.find_leaf_forced(dst_parent, current_name).await? {
                    Some(leaf) if leaf.id == id => {
                        debug!(%id, "move conflict but file already in target");
                        Ok(())
                    }
                    _ => Err(err),
                }
            }
            Err(err) => Err(err),
        }
    }
}

// ============================================================================
// RemoteFs implementation
// ============================================================================

#[async_trait]
impl RemoteFs for Pan123Fs {
    fn features(&self) -> Features {
        Features::default()
    }

    async fn list(&self, dir: &RemotePath) -> Result<Vec<Object>> {
        let dir_id = self.dir_id(dir).await?;
        let entries = self.resolver.list_all(dir_id).await?;
        Ok(entries
            .iter()
            .map(|e| Object::from_entry(e, dir.join(&e.filename)))
            .collect())
    }

    async fn new_object(&self, remote: &RemotePath) -> Result<Object> {
        let abs = self.abs(remote);
        let (parent_rel, leaf) = abs
            .parent_and_leaf()
            .ok_or_else(|| BackendError::NotAFile("the root directory".to_string()))?;
        let parent_id = self.resolver.resolve_dir(self.root_id, &parent_rel).await?;
        let found = self
            .resolver
            .find_leaf(parent_id, leaf)
            .await?
            .ok_or_else(|| BackendError::NotFound(remote.to_string()))?;
        if found.is_dir {
            return Err(BackendError::NotAFile(remote.to_string()));
        }

        let detail: RemoteEntry = self
            .client
            .get_json(
                endpoints::FILE_DETAIL,
                &[("fileID", found.id.as_i64().to_string())],
            )
            .await?;
        if !detail.is_alive() {
            return Err(if detail.status >= STATUS_REJECTED {
                BackendError::Permission(remote.to_string())
            } else {
                BackendError::NotFound(remote.to_string())
            });
        }
        Ok(Object::from_entry(&detail, remote.clone()))
    }

    async fn put(&self, source: &dyn ContentSource) -> Result<Object> {
        let src_remote = source.info().remote.clone();
        let abs = self.abs(&src_remote);
        let (parent_abs, leaf) = abs
            .parent_and_leaf()
            .ok_or_else(|| BackendError::Validation("upload path has no name".to_string()))?;

        let cleaned = clean_name(leaf);
        if cleaned != leaf {
            info!(original = leaf, cleaned = %cleaned, "sanitized upload name");
        }

        let mut parent_id = self.resolver.ensure_dir(self.root_id, &parent_abs).await?;
        if !self.resolver.verify_parent(parent_id).await? {
            debug!(%parent_id, "parent failed verification, resetting cache and retrying");
            self.resolver.cache().reset();
            parent_id = self.resolver.ensure_dir(self.root_id, &parent_abs).await?;
            if !self.resolver.verify_parent(parent_id).await? {
                return Err(BackendError::NotFound(format!(
                    "upload parent {parent_abs} cannot be verified"
                )));
            }
        }

        // An existing object under the same name turns this put into an
        // in-place update.
        let existing = self.resolver.find_leaf(parent_id, &cleaned).await?;
        let policy = match existing {
            Some(leaf) if leaf.is_dir => {
                return Err(BackendError::Conflict(format!(
                    "a directory named {cleaned:?} is in the way"
                )))
            }
            Some(_) => DuplicatePolicy::Overwrite,
            None => DuplicatePolicy::Rename,
        };

        let wire_name = self.resolver.encode_name(&cleaned);
        let outcome = self
            .uploader
            .put(source, parent_id, &wire_name, policy, self.resolver.as_ref())
            .await?;
        if outcome.parent_id != parent_id {
            warn!(
                requested = %parent_id,
                actual = %outcome.parent_id,
                "upload landed under a repaired parent"
            );
        }
        self.resolver.cache().put(
            outcome.parent_id,
            &cleaned,
            CachedLeaf {
                id: outcome.file_id,
                is_dir: false,
            },
        );

        let remote = match src_remote.parent_and_leaf() {
            Some((rel_parent, _)) => rel_parent.join(&cleaned),
            None => RemotePath::root().join(&cleaned),
        };
        Ok(Object {
            id: outcome.file_id,
            remote,
            size: outcome.size,
            md5: Some(outcome.md5),
            mod_time: None,
            is_dir: false,
        })
    }

    async fn mkdir(&self, dir: &RemotePath) -> Result<()> {
        self.resolver
            .ensure_dir(self.root_id, &self.abs(dir))
            .await?;
        Ok(())
    }

    async fn rmdir(&self, dir: &RemotePath) -> Result<()> {
        let abs = self.abs(dir);
        let (parent_rel, leaf) = abs
            .parent_and_leaf()
            .ok_or_else(|| BackendError::Validation("refusing to remove the root".to_string()))?;
        let parent_id = self.resolver.resolve_dir(self.root_id, &parent_rel).await?;
        let found = self
            .resolver
            .find_leaf(parent_id, leaf)
            .await?
            .ok_or_else(|| BackendError::NotFound(dir.to_string()))?;
        if !found.is_dir {
            return Err(BackendError::NotAFile(dir.to_string()));
        }
        let children = self.resolver.list_all(found.id).await?;
        if !children.is_empty() {
            return Err(BackendError::Validation(format!(
                "directory {dir} is not empty"
            )));
        }
        self.trash(vec![found.id.as_i64()], None).await?;
        self.resolver.cache().invalidate(parent_id, leaf);
        self.resolver.cache().forget_parent(found.id);
        Ok(())
    }

    async fn move_object(&self, src: &Object, dst: &RemotePath) -> Result<Object> {
        let (src_rel_parent, src_leaf) = src
            .remote
            .parent_and_leaf()
            .map(|(p, l)| (p, l.to_string()))
            .ok_or_else(|| BackendError::NotAFile("the root directory".to_string()))?;
        let (dst_rel_parent, dst_leaf) = dst
            .parent_and_leaf()
            .map(|(p, l)| (p, l.to_string()))
            .ok_or_else(|| BackendError::Validation("destination has no name".to_string()))?;

        let src_parent_id = self
            .resolver
            .resolve_dir(self.root_id, &self.root_path.join_path(&src_rel_parent))
            .await?;
        let dst_parent_id = self
            .resolver
            .ensure_dir(self.root_id, &self.root_path.join_path(&dst_rel_parent))
            .await?;

        let cleaned = clean_name(&dst_leaf);
        let mut final_name = cleaned.clone();
        if let Some(existing) = self.resolver.find_leaf_forced(dst_parent_id, &cleaned).await? {
            if existing.id != src.id {
                final_name = generate_unique_name(&self.resolver, dst_parent_id, &cleaned).await?;
                info!(
                    wanted = %cleaned,
                    using = %final_name,
                    "destination name occupied, moving under a unique name"
                );
            }
        }

        if src_parent_id == dst_parent_id {
            if final_name != src_leaf {
                self.rename_checked(src.id, dst_parent_id, &final_name).await?;
            }
        } else {
            self.move_checked(src.id, dst_parent_id, &src_leaf).await?;
            if final_name != src_leaf {
                self.rename_checked(src.id, dst_parent_id, &final_name).await?;
            }
        }

        self.resolver.cache().invalidate(src_parent_id, &src_leaf);
        self.resolver.cache().put(
            dst_parent_id,
            &final_name,
            CachedLeaf {
                id: src.id,
                is_dir: src.is_dir,
            },
        );

        Ok(Object {
            id: src.id,
            remote: dst_rel_parent.join(&final_name),
            size: src.size,
            md5: src.md5.clone(),
            mod_time: src.mod_time,
            is_dir: src.is_dir,
        })
    }

    async fn dir_move(&self, src: &RemotePath, dst: &RemotePath) -> Result<()> {
        let src_abs = self.abs(src);
        let (_, src_leaf) = src_abs
            .parent_and_leaf()
            .map(|(p, l)| (p, l.to_string()))
            .ok_or_else(|| BackendError::Validation("cannot move the root".to_string()))?;
        let src_id = self.resolver.resolve_dir(self.root_id, &src_abs).await?;

        let (dst_rel_parent, dst_leaf) = dst
            .parent_and_leaf()
            .map(|(p, l)| (p, l.to_string()))
            .ok_or_else(|| BackendError::Validation("destination has no name".to_string()))?;
        let dst_parent_id = self
            .resolver
            .ensure_dir(self.root_id, &self.root_path.join_path(&dst_rel_parent))
            .await?;

        if self
            .resolver
            .find_leaf_forced(dst_parent_id, &dst_leaf)
            .await?
            .is_some()
        {
            return Err(BackendError::Conflict(format!(
                "destination {dst} already exists"
            )));
        }

        self.move_checked(src_id, dst_parent_id, &src_leaf).await?;
        if dst_leaf != src_leaf {
            self.rename_checked(src_id, dst_parent_id, &dst_leaf).await?;
        }

        // Every cached path under the moved subtree is stale now.
        self.resolver.cache().reset();
        Ok(())
    }

    async fn copy(&self, src: &Object, dst: &RemotePath) -> Result<Object> {
        if src.is_dir {
            return Err(BackendError::NotAFile(src.remote.to_string()));
        }
        debug!(src = %src.remote, dst = %dst, "copy via download and re-upload");
        let source = RemoteObjectSource {
            downloader: &self.downloader,
            id: src.id,
            size: src.size,
            info: SourceInfo {
                remote: dst.clone(),
                size: src.size as i64,
                md5: src.md5.clone(),
                mod_time: src.mod_time,
                local: false,
            },
        };
        self.put(&source).await
    }

    async fn purge(&self, dir: &RemotePath) -> Result<()> {
        let abs = self.abs(dir);
        let dir_id = self.resolver.resolve_dir(self.root_id, &abs).await?;

        let mut failed: HashSet<i64> = HashSet::new();
        let mut failures = 0usize;
        let mut last_err: Option<BackendError> = None;
        let mut iterations = 0u32;

        loop {
            // Walk pages until a batch of untried entries shows up or the
            // cursor terminates.
            let mut cursor = None;
            let batch: Vec<i64> = loop {
                iterations += 1;
                if iterations > PURGE_ITERATION_LIMIT {
                    return Err(BackendError::Transient(format!(
                        "purge of {dir} exceeded {PURGE_ITERATION_LIMIT} iterations"
                    )));
                }
                let page = self.resolver.list_page(dir_id, cursor).await?;
                let batch: Vec<i64> = page
                    .file_list
                    .iter()
                    .filter(|e| e.is_alive() && !failed.contains(&e.file_id))
                    .map(|e| e.file_id)
                    .collect();
                if !batch.is_empty() || page.last_file_id < 0 {
                    break batch;
                }
                cursor = Some(page.last_file_id);
            };
            if batch.is_empty() {
                break;
            }

            match self.trash(batch.clone(), Some(PacerKind::Batch)).await {
                Ok(()) => {}
                Err(_) => {
                    // Retry entries one at a time so a single rejected
                    // file does not block the rest of the sweep.
                    for id in batch {
                        if let Err(err) = self.trash(vec![id], Some(PacerKind::Batch)).await {
                            warn!(id, error = %err, "purge: entry could not be trashed");
                            failed.insert(id);
                            failures += 1;
                            last_err = Some(err);
                        }
                    }
                }
            }
        }

        if failures == 0 && !abs.is_root() {
            self.trash(vec![dir_id.as_i64()], None).await?;
        }
        self.resolver.cache().reset();

        match last_err {
            None => Ok(()),
            Some(err) => Err(BackendError::Protocol {
                code: -1,
                message: format!("purge left {failures} entries behind (last error: {err})"),
            }),
        }
    }

    async fn about(&self) -> Result<Usage> {
        let data: UserInfoData = self.client.get_json(endpoints::USER_INFO, &[]).await?;
        let total = match (data.space_permanent, data.space_temp) {
            (None, None) => None,
            (permanent, temp) => Some(permanent.unwrap_or(0) + temp.unwrap_or(0)),
        };
        let used = data.space_used;
        let free = match (total, used) {
            (Some(total), Some(used)) => Some(total.saturating_sub(used)),
            _ => None,
        };
        Ok(Usage { total, used, free })
    }

    async fn open(&self, obj: &Object, opts: &OpenOptions) -> Result<ByteStream> {
        if obj.is_dir {
            return Err(BackendError::NotAFile(obj.remote.to_string()));
        }
        self.downloader.open(obj.id, obj.size, opts).await
    }

    async fn remove(&self, obj: &Object) -> Result<()> {
        self.trash(vec![obj.id.as_i64()], None).await?;

        // Drop the cached mapping; resolution failures just flush wider.
        let abs = self.abs(&obj.remote);
        if let Some((parent_rel, leaf)) = abs.parent_and_leaf() {
            match self.resolver.resolve_dir(self.root_id, &parent_rel).await {
                Ok(parent_id) => self.resolver.cache().invalidate(parent_id, leaf),
                Err(_) => self.resolver.cache().reset(),
            }
        }
        Ok(())
    }
}

// ============================================================================
// Cross-cloud copy source
// ============================================================================

/// A [`ContentSource`] that reads back out of the remote itself; marked
/// non-local so the upload engine spools it before re-uploading
struct RemoteObjectSource<'a> {
    downloader: &'a Downloader,
    id: FileId,
    size: u64,
    info: SourceInfo,
}

#[async_trait]
impl ContentSource for RemoteObjectSource<'_> {
    fn info(&self) -> &SourceInfo {
        &self.info
    }

    fn reopenable(&self) -> bool {
        true
    }

    async fn open(&self, range: Option<OpenRange>) -> Result<ByteStream> {
        let opts = OpenOptions {
            range,
            disable_concurrent_download: true,
            user_agent: None,
        };
        self.downloader.open(self.id, self.size, &opts).await
    }
}
