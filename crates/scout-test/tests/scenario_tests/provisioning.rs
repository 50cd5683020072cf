//! Binary provisioning: download, verify, cache.

use std::path::Path;

use scout_core::{CoreAgentVersion, ScoutError};
use scout_provision::{
    PlatformTriple, ProvisionError, ProvisionOptions, Provisioner, TMP_DIR_PREFIX, sha256_file,
};
use scout_test::AgentArchive;

const VERSION: &str = "v1.4.0";

fn provisioner(cache: &Path, downloads: &Path) -> Provisioner {
    Provisioner::new(
        ProvisionOptions::new(cache, format!("file://{}", downloads.display()))
            .with_triple(PlatformTriple::X86_64LinuxGnu),
    )
}

fn version() -> CoreAgentVersion {
    CoreAgentVersion::parse(VERSION).unwrap()
}

#[tokio::test]
async fn resolved_binary_matches_manifest_checksum() {
    let cache = tempfile::tempdir().unwrap();
    let downloads = tempfile::tempdir().unwrap();
    let provisioner = provisioner(cache.path(), downloads.path());
    let archive = AgentArchive::new(VERSION).binary(b"#!/bin/sh\necho agent\n".to_vec());
    archive
        .write(downloads.path(), &provisioner.bundle_name(&version()).unwrap())
        .unwrap();

    let binary = provisioner.resolve(&version()).await.unwrap();

    assert!(binary.starts_with(provisioner.bundle_dir(&version()).unwrap()));
    assert_eq!(sha256_file(&binary).unwrap(), archive.binary_sha256());
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&binary).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
    }
}

#[tokio::test]
async fn cached_bundle_is_reused_without_archive() {
    let cache = tempfile::tempdir().unwrap();
    let downloads = tempfile::tempdir().unwrap();
    let provisioner = provisioner(cache.path(), downloads.path());
    let archive_path = AgentArchive::new(VERSION)
        .write(downloads.path(), &provisioner.bundle_name(&version()).unwrap())
        .unwrap();

    let first = provisioner.resolve(&version()).await.unwrap();
    std::fs::remove_file(archive_path).unwrap();
    let second = provisioner.resolve(&version()).await.unwrap();

    assert_eq!(first, second);
}

#[tokio::test]
async fn tampered_archive_is_rejected_and_not_installed() {
    let cache = tempfile::tempdir().unwrap();
    let downloads = tempfile::tempdir().unwrap();
    let provisioner = provisioner(cache.path(), downloads.path());
    AgentArchive::new(VERSION)
        .checksum("0".repeat(64))
        .write(downloads.path(), &provisioner.bundle_name(&version()).unwrap())
        .unwrap();

    let err = provisioner.resolve(&version()).await.unwrap_err();

    assert!(matches!(err, ProvisionError::ChecksumMismatch { .. }));
    assert!(!provisioner.bundle_dir(&version()).unwrap().exists());
    let leftovers = std::fs::read_dir(cache.path())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().starts_with(TMP_DIR_PREFIX))
        .count();
    assert_eq!(leftovers, 0);
    assert!(matches!(
        ScoutError::from(err),
        ScoutError::ChecksumMismatch { .. }
    ));
}

#[tokio::test]
async fn flat_archive_layout_is_accepted() {
    let cache = tempfile::tempdir().unwrap();
    let downloads = tempfile::tempdir().unwrap();
    let provisioner = provisioner(cache.path(), downloads.path());
    AgentArchive::new(VERSION)
        .flat()
        .write(downloads.path(), &provisioner.bundle_name(&version()).unwrap())
        .unwrap();

    assert!(provisioner.resolve(&version()).await.is_ok());
}

#[tokio::test]
async fn download_disallowed_without_cache() {
    let cache = tempfile::tempdir().unwrap();
    let downloads = tempfile::tempdir().unwrap();
    let mut options = ProvisionOptions::new(cache.path(), format!("file://{}", downloads.path().display()))
        .with_triple(PlatformTriple::X86_64LinuxGnu);
    options.allow_download = false;

    let err = Provisioner::new(options).resolve(&version()).await.unwrap_err();

    assert!(matches!(err, ProvisionError::ExternalDownloadDisallowed));
}

#[tokio::test]
async fn wrong_version_in_archive_is_rejected() {
    let cache = tempfile::tempdir().unwrap();
    let downloads = tempfile::tempdir().unwrap();
    let provisioner = provisioner(cache.path(), downloads.path());
    AgentArchive::new("v9.9.9")
        .write(downloads.path(), &provisioner.bundle_name(&version()).unwrap())
        .unwrap();

    let err = provisioner.resolve(&version()).await.unwrap_err();

    assert!(matches!(err, ProvisionError::VersionMismatch { .. }));
}

#[tokio::test]
async fn concurrent_resolutions_agree() {
    let cache = tempfile::tempdir().unwrap();
    let downloads = tempfile::tempdir().unwrap();
    let provisioner = provisioner(cache.path(), downloads.path());
    let archive = AgentArchive::new(VERSION);
    archive
        .write(downloads.path(), &provisioner.bundle_name(&version()).unwrap())
        .unwrap();

    let (va, vb, vc) = (version(), version(), version());
    let (a, b, c) = tokio::join!(
        provisioner.resolve(&va),
        provisioner.resolve(&vb),
        provisioner.resolve(&vc),
    );

    let a = a.unwrap();
    assert_eq!(a, b.unwrap());
    assert_eq!(a, c.unwrap());
    assert_eq!(sha256_file(&a).unwrap(), archive.binary_sha256());
}
