//! Cache engine behavior: tee fidelity, group ordering, fallthrough
//! policy, disconnect resilience, and upsert convergence.

mod common;

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;

use amargo::cache::{FetchFuture, FetchReply, ServeOptions, ServeOutcome, Target};
use amargo::error::AppError;
use amargo::models::{Repository, RepositoryFormat, RepositoryType};
use amargo::storage::stream_from_bytes;

use common::{chunked_payload, collect, sha256_hex, Harness};

fn found_hook(payload: &'static [u8]) -> impl Fn(Repository) -> FetchFuture {
    move |_repo| -> FetchFuture {
        Box::pin(async move {
            Ok(FetchReply::Found {
                stream: stream_from_bytes(Bytes::from_static(payload)),
                content_type: Some("application/octet-stream".to_string()),
            })
        })
    }
}

fn missing_hook() -> impl Fn(Repository) -> FetchFuture {
    |_repo| -> FetchFuture { Box::pin(async { Ok(FetchReply::Missing) }) }
}

#[tokio::test]
async fn test_miss_then_hit_roundtrip() {
    let h = Harness::new();
    let repo = h
        .add_repo(
            "npm-proxy",
            RepositoryFormat::Npm,
            RepositoryType::Proxy,
            Some("https://registry.npmjs.org"),
        )
        .await;

    let payload = b"tarball bytes";
    let outcome = h
        .cache
        .serve(
            Target::Repository(repo.id),
            "express",
            "4.18.2",
            found_hook(payload),
            ServeOptions::default(),
        )
        .await
        .unwrap();

    let ServeOutcome::Miss {
        repository,
        stream,
        stored,
        ..
    } = outcome
    else {
        panic!("expected MISS on cold cache");
    };
    assert_eq!(repository, "npm-proxy");

    // Tee fidelity: the caller sees exactly the upstream bytes
    let delivered = collect(stream).await.unwrap();
    assert_eq!(delivered, payload);

    // The completion channel reports the stored artifact
    let info = stored.await.unwrap().unwrap();
    assert_eq!(info.size_bytes as usize, payload.len());
    assert_eq!(info.checksum_sha256, sha256_hex(payload));

    // Second request is a HIT with the same bytes; the hook must not run
    let outcome = h
        .cache
        .serve(
            Target::Repository(repo.id),
            "express",
            "4.18.2",
            |_repo| -> FetchFuture {
                Box::pin(async { panic!("hook must not be invoked on a hit") })
            },
            ServeOptions::default(),
        )
        .await
        .unwrap();

    let ServeOutcome::Hit {
        repository,
        stream,
        info,
    } = outcome
    else {
        panic!("expected HIT after population");
    };
    assert_eq!(repository, "npm-proxy");
    assert_eq!(collect(stream).await.unwrap(), payload);
    assert_eq!(info.checksum_sha256, sha256_hex(payload));
}

#[tokio::test]
async fn test_group_priority_prefers_lower_number() {
    let h = Harness::new();
    let primary = h
        .add_repo(
            "mirror-a",
            RepositoryFormat::Maven,
            RepositoryType::Proxy,
            Some("https://a.example.com"),
        )
        .await;
    let secondary = h
        .add_repo(
            "mirror-b",
            RepositoryFormat::Maven,
            RepositoryType::Proxy,
            Some("https://b.example.com"),
        )
        .await;
    h.add_group(
        "maven",
        RepositoryFormat::Maven,
        &[(&primary, 1), (&secondary, 2)],
    )
    .await;

    // Both members hold the artifact, with different content
    for (repo, content) in [(&primary, b"from-a".as_slice()), (&secondary, b"from-b")] {
        h.artifacts
            .store(
                repo.id,
                "org/x/lib.jar",
                "1.0",
                stream_from_bytes(Bytes::copy_from_slice(content)),
                "application/java-archive",
                HashMap::new(),
                None,
            )
            .await
            .unwrap();
    }

    let outcome = h
        .cache
        .serve(
            Target::Group("maven".into()),
            "org/x/lib.jar",
            "1.0",
            missing_hook(),
            ServeOptions::default(),
        )
        .await
        .unwrap();

    let ServeOutcome::Hit {
        repository, stream, ..
    } = outcome
    else {
        panic!("expected HIT");
    };
    assert_eq!(repository, "mirror-a");
    assert_eq!(collect(stream).await.unwrap(), b"from-a");
}

#[tokio::test]
async fn test_group_upstream_fallthrough_on_404() {
    let h = Harness::new();
    let private = h
        .add_repo(
            "private",
            RepositoryFormat::Docker,
            RepositoryType::Proxy,
            Some("https://registry.example.com"),
        )
        .await;
    let hub = h
        .add_repo(
            "dockerhub",
            RepositoryFormat::Docker,
            RepositoryType::Proxy,
            Some("https://registry-1.docker.io"),
        )
        .await;
    h.add_group("docker", RepositoryFormat::Docker, &[(&private, 1), (&hub, 2)])
        .await;

    let hub_name = hub.name.clone();
    let fetch = move |repo: Repository| -> FetchFuture {
        let is_hub = repo.name == hub_name;
        Box::pin(async move {
            if is_hub {
                Ok(FetchReply::Found {
                    stream: stream_from_bytes(Bytes::from_static(b"manifest")),
                    content_type: Some("application/vnd.oci.image.manifest.v1+json".into()),
                })
            } else {
                Ok(FetchReply::Missing)
            }
        })
    };

    let outcome = h
        .cache
        .serve(
            Target::Group("docker".into()),
            "library/alpine:manifest:3.19",
            "3.19",
            fetch,
            ServeOptions::default(),
        )
        .await
        .unwrap();

    let ServeOutcome::Miss {
        repository, stored, stream, ..
    } = outcome
    else {
        panic!("expected MISS via fallthrough");
    };
    assert_eq!(repository, "dockerhub");

    collect(stream).await.unwrap();
    let info = stored.await.unwrap().unwrap();
    // Cached against the member that produced it
    assert_eq!(info.repository_id, hub.id);
    assert!(h
        .artifacts
        .exists(hub.id, "library/alpine:manifest:3.19", "3.19")
        .await
        .unwrap());
    assert!(!h
        .artifacts
        .exists(private.id, "library/alpine:manifest:3.19", "3.19")
        .await
        .unwrap());
}

#[tokio::test]
async fn test_upstream_5xx_aborts_instead_of_falling_through() {
    let h = Harness::new();
    let broken = h
        .add_repo(
            "broken-mirror",
            RepositoryFormat::Pypi,
            RepositoryType::Proxy,
            Some("https://broken.example.com"),
        )
        .await;
    let healthy = h
        .add_repo(
            "healthy-mirror",
            RepositoryFormat::Pypi,
            RepositoryType::Proxy,
            Some("https://healthy.example.com"),
        )
        .await;
    h.add_group("pypi", RepositoryFormat::Pypi, &[(&broken, 1), (&healthy, 2)])
        .await;

    let broken_name = broken.name.clone();
    let fetch = move |repo: Repository| -> FetchFuture {
        let is_broken = repo.name == broken_name;
        Box::pin(async move {
            if is_broken {
                Err(AppError::UpstreamUnavailable("upstream returned 503".into()))
            } else {
                Ok(FetchReply::Found {
                    stream: stream_from_bytes(Bytes::from_static(b"wrong content")),
                    content_type: None,
                })
            }
        })
    };

    let err = h
        .cache
        .serve(
            Target::Group("pypi".into()),
            "requests/requests-2.31.0.tar.gz",
            "2.31.0",
            fetch,
            ServeOptions::default(),
        )
        .await
        .unwrap_err();

    // A failing mirror must not be masked by a lower-priority member
    assert!(matches!(err, AppError::UpstreamUnavailable(_)));
}

#[tokio::test]
async fn test_unauthorized_aborts_pass() {
    let h = Harness::new();
    let repo = h
        .add_repo(
            "hub",
            RepositoryFormat::Docker,
            RepositoryType::Proxy,
            Some("https://registry-1.docker.io"),
        )
        .await;

    let err = h
        .cache
        .serve(
            Target::Repository(repo.id),
            "alpine:manifest:latest",
            "latest",
            |_repo| -> FetchFuture {
                Box::pin(async { Err(AppError::Unauthorized("token rejected".into())) })
            },
            ServeOptions::default(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Unauthorized(_)));
}

#[tokio::test]
async fn test_not_found_when_every_candidate_misses() {
    let h = Harness::new();
    let a = h
        .add_repo(
            "a",
            RepositoryFormat::Go,
            RepositoryType::Proxy,
            Some("https://proxy.golang.org"),
        )
        .await;
    let b = h
        .add_repo(
            "b",
            RepositoryFormat::Go,
            RepositoryType::Proxy,
            Some("https://goproxy.io"),
        )
        .await;
    h.add_group("go", RepositoryFormat::Go, &[(&a, 1), (&b, 2)]).await;

    let outcome = h
        .cache
        .serve(
            Target::Group("go".into()),
            "example.com/mod",
            "v1.0.0",
            missing_hook(),
            ServeOptions::default(),
        )
        .await
        .unwrap();

    assert!(matches!(outcome, ServeOutcome::NotFound));
}

#[tokio::test]
async fn test_hosted_member_never_fetched() {
    let h = Harness::new();
    let hosted = h
        .add_repo("hosted", RepositoryFormat::Npm, RepositoryType::Hosted, None)
        .await;
    h.add_group("npm", RepositoryFormat::Npm, &[(&hosted, 0)]).await;

    let outcome = h
        .cache
        .serve(
            Target::Group("npm".into()),
            "left-pad",
            "1.3.0",
            |_repo| -> FetchFuture {
                Box::pin(async { panic!("hosted members must not reach the upstream pass") })
            },
            ServeOptions::default(),
        )
        .await
        .unwrap();

    assert!(matches!(outcome, ServeOutcome::NotFound));
}

#[tokio::test]
async fn test_caller_disconnect_store_still_populates() {
    let h = Harness::new();
    let repo = h
        .add_repo(
            "maven-central",
            RepositoryFormat::Maven,
            RepositoryType::Proxy,
            Some("https://repo.maven.apache.org/maven2"),
        )
        .await;

    // A payload far larger than the tee buffers
    let (payload_stream, expected) = chunked_payload(0xAB, 8 * 1024, 512);
    let holder = std::sync::Mutex::new(Some(payload_stream));

    let outcome = h
        .cache
        .serve(
            Target::Repository(repo.id),
            "org/apache/commons/commons-lang3/commons-lang3-3.12.0.jar",
            "3.12.0",
            move |_repo| -> FetchFuture {
                // The hook runs once for the single proxy member
                let stream = holder.lock().unwrap().take().expect("single fetch expected");
                Box::pin(async move {
                    Ok(FetchReply::Found {
                        stream,
                        content_type: Some("application/java-archive".into()),
                    })
                })
            },
            ServeOptions::default(),
        )
        .await
        .unwrap();

    let ServeOutcome::Miss { mut stream, stored, .. } = outcome else {
        panic!("expected MISS");
    };

    // Read one chunk, then hang up
    let first = stream.next().await.unwrap().unwrap();
    assert!(!first.is_empty());
    drop(stream);

    // The store sink still runs to completion
    let info = stored.await.unwrap().unwrap();
    assert_eq!(info.size_bytes as usize, expected.len());
    assert_eq!(info.checksum_sha256, sha256_hex(&expected));

    // And the next request is a faithful HIT
    let outcome = h
        .cache
        .serve(
            Target::Repository(repo.id),
            "org/apache/commons/commons-lang3/commons-lang3-3.12.0.jar",
            "3.12.0",
            missing_hook(),
            ServeOptions::default(),
        )
        .await
        .unwrap();
    let ServeOutcome::Hit { stream, .. } = outcome else {
        panic!("expected HIT after disconnected MISS populated the cache");
    };
    assert_eq!(collect(stream).await.unwrap(), expected);
}

#[tokio::test]
async fn test_store_failure_keeps_client_stream_alive() {
    let h = Harness::new();
    let repo = h
        .add_repo(
            "npm-proxy",
            RepositoryFormat::Npm,
            RepositoryType::Proxy,
            Some("https://registry.npmjs.org"),
        )
        .await;

    h.blobs.set_fail_puts(true);

    let payload = b"bytes the client must still receive";
    let outcome = h
        .cache
        .serve(
            Target::Repository(repo.id),
            "lodash",
            "4.17.21",
            found_hook(payload),
            ServeOptions::default(),
        )
        .await
        .unwrap();

    let ServeOutcome::Miss { stream, stored, .. } = outcome else {
        panic!("expected MISS");
    };

    // Client gets the full body even though the cache insert fails
    assert_eq!(collect(stream).await.unwrap(), payload);
    assert!(matches!(
        stored.await.unwrap(),
        Err(AppError::StoreFailure(_))
    ));
    assert!(!h.artifacts.exists(repo.id, "lodash", "4.17.21").await.unwrap());
}

#[tokio::test]
async fn test_concurrent_identical_misses_converge() {
    let h = Harness::new();
    let repo = h
        .add_repo(
            "nuget-proxy",
            RepositoryFormat::Nuget,
            RepositoryType::Proxy,
            Some("https://api.nuget.org"),
        )
        .await;

    let payload: &[u8] = b"identical nupkg bytes";

    let (a, b) = tokio::join!(
        h.cache.serve(
            Target::Repository(repo.id),
            "newtonsoft.json",
            "13.0.3",
            found_hook(payload),
            ServeOptions::default(),
        ),
        h.cache.serve(
            Target::Repository(repo.id),
            "newtonsoft.json",
            "13.0.3",
            found_hook(payload),
            ServeOptions::default(),
        )
    );

    for outcome in [a.unwrap(), b.unwrap()] {
        if let ServeOutcome::Miss { stream, stored, .. } = outcome {
            assert_eq!(collect(stream).await.unwrap(), payload);
            let _ = stored.await;
        }
    }

    // One row, digest matching the bytes
    let (stream, info) = h
        .artifacts
        .get(repo.id, "newtonsoft.json", "13.0.3")
        .await
        .unwrap()
        .expect("artifact must exist");
    assert_eq!(h.meta.artifact_count(), 1);
    assert_eq!(info.checksum_sha256, sha256_hex(payload));
    assert_eq!(collect(stream).await.unwrap(), payload);
}

#[tokio::test]
async fn test_expected_digest_mismatch_abandons_cache_insert() {
    let h = Harness::new();
    let repo = h
        .add_repo(
            "hub",
            RepositoryFormat::Docker,
            RepositoryType::Proxy,
            Some("https://registry-1.docker.io"),
        )
        .await;

    let payload = b"blob bytes";
    let options = ServeOptions {
        expected_digest: Some("0".repeat(64)),
        ..Default::default()
    };

    let outcome = h
        .cache
        .serve(
            Target::Repository(repo.id),
            "alpine:blob:sha256:000",
            "sha256:000",
            found_hook(payload),
            options,
        )
        .await
        .unwrap();

    let ServeOutcome::Miss { stream, stored, .. } = outcome else {
        panic!("expected MISS");
    };

    // Bytes still flow to the caller; the cache entry is abandoned
    assert_eq!(collect(stream).await.unwrap(), payload);
    assert!(matches!(
        stored.await.unwrap(),
        Err(AppError::StoreFailure(_))
    ));
    assert!(!h
        .artifacts
        .exists(repo.id, "alpine:blob:sha256:000", "sha256:000")
        .await
        .unwrap());
}

#[tokio::test]
async fn test_ttl_override_sets_entry_expiry() {
    let h = Harness::new();
    let repo = h
        .add_repo(
            "go-proxy",
            RepositoryFormat::Go,
            RepositoryType::Proxy,
            Some("https://proxy.golang.org"),
        )
        .await;

    let options = ServeOptions {
        ttl: Some(Duration::from_secs(60)),
        ..Default::default()
    };

    let outcome = h
        .cache
        .serve(
            Target::Repository(repo.id),
            "example.com/mod",
            "v1.2.3",
            found_hook(b"zip"),
            options,
        )
        .await
        .unwrap();

    if let ServeOutcome::Miss { stream, stored, .. } = outcome {
        collect(stream).await.unwrap();
        stored.await.unwrap().unwrap();
    }

    let entry = h
        .meta
        .entry_for(repo.id, "example.com/mod", "v1.2.3")
        .expect("cache entry must exist");
    let remaining = entry.expires_at - chrono::Utc::now();
    // Override (60s) applies instead of the repository default (3600s)
    assert!(remaining.num_seconds() <= 60);
    assert!(remaining.num_seconds() > 30);
}
