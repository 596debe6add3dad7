//! Media types recognised by the stores and the compositor

pub const OCI_MANIFEST_V1: &str = "application/vnd.oci.image.manifest.v1+json";
pub const OCI_INDEX_V1: &str = "application/vnd.oci.image.index.v1+json";
pub const OCI_CONFIG_V1: &str = "application/vnd.oci.image.config.v1+json";
pub const OCI_LAYER_V1_TAR: &str = "application/vnd.oci.image.layer.v1.tar";
pub const OCI_LAYER_V1_TAR_GZIP: &str = "application/vnd.oci.image.layer.v1.tar+gzip";

pub const DOCKER_MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const DOCKER_MANIFEST_LIST_V2: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
pub const DOCKER_CONFIG_V1: &str = "application/vnd.docker.container.image.v1+json";
pub const DOCKER_LAYER_TAR_GZIP: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";

pub const DENODIR_CONFIG_V1: &str = "application/vnd.deno.denodir.config.v1+json";
pub const DENODIR_LAYER_V1_TAR_GZIP: &str = "application/vnd.deno.denodir.v1.tar+gzip";

/// Coarse classification of a manifest-level media type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestKind {
    /// A single image manifest (OCI or Docker v2)
    Image,
    /// A multi-platform index (OCI index or Docker manifest list)
    Index,
}

impl ManifestKind {
    pub fn from_media_type(media_type: &str) -> Option<Self> {
        match media_type {
            OCI_MANIFEST_V1 | DOCKER_MANIFEST_V2 => Some(ManifestKind::Image),
            OCI_INDEX_V1 | DOCKER_MANIFEST_LIST_V2 => Some(ManifestKind::Index),
            _ => None,
        }
    }
}

/// Config blobs that describe a runnable container image
pub fn is_image_config(media_type: &str) -> bool {
    matches!(media_type, OCI_CONFIG_V1 | DOCKER_CONFIG_V1)
}

/// Layer blobs that are gzip-compressed tarballs
pub fn is_gzip_tar_layer(media_type: &str) -> bool {
    media_type.ends_with("tar+gzip") || media_type == DOCKER_LAYER_TAR_GZIP
}
