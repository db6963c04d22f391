//! Integration tests for route resolution and scoped shared-directory visibility

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::SiteFixture;
use exec_router::routing::{RouteCache, RouteLookup, RouteResolver};
use exec_router::ErrorKind;
use rstest::rstest;

fn nested_site() -> SiteFixture {
    let site = SiteFixture::new();
    site.add_route("index", "exit 0");
    site.add_route("a/b/c/index", "exit 0");
    site.add_route("a/b/d/index", "exit 0");
    site.add_route("a/index", "exit 0");
    for dir in ["a/shared", "a/b/shared", "a/b/c/shared", "a/b/d/shared"] {
        site.add_dir(dir);
    }
    site
}

#[test]
fn test_scoped_visibility() {
    let site = nested_site();
    let resolver = RouteResolver::new(site.root()).expect("Failed to create resolver");
    let root = resolver.site_root().to_path_buf();

    let entry = resolver.resolve("/a/b/c").expect("Failed to resolve /a/b/c");
    assert_eq!(entry.executable, root.join("a/b/c/index"));
    assert_eq!(
        entry.resource_paths,
        vec![
            root.join("a/b/c/shared"),
            root.join("a/b/shared"),
            root.join("a/shared"),
            root.join("shared"),
        ]
    );

    // Siblings and descendants stay invisible
    assert!(!entry.resource_paths.contains(&root.join("a/b/d/shared")));

    let upper = resolver.resolve("/a").expect("Failed to resolve /a");
    assert_eq!(upper.resource_paths, vec![root.join("a/shared"), root.join("shared")]);
}

#[rstest]
#[case("/a/../../etc")]
#[case("/a/%2E%2E/%2e%2e/etc")]
#[case("/..%2f..%2fetc")]
fn test_traversal_rejected(#[case] path: &str) {
    let site = nested_site();
    let resolver = RouteResolver::new(site.root()).expect("Failed to create resolver");

    let err = resolver.resolve(path).expect_err("Traversal must fail");
    assert_eq!(err.kind(), ErrorKind::InvalidPath);
    assert_eq!(err.status_code(), 400);
}

#[rstest]
#[case("/missing")]
#[case("/a/b")]
#[case("/a/b/c/extra")]
#[case("/a/shared")]
fn test_no_fallback_to_parent(#[case] path: &str) {
    let site = nested_site();
    let resolver = RouteResolver::new(site.root()).expect("Failed to create resolver");

    let err = resolver.resolve(path).expect_err("Resolution must fail");
    assert_eq!(err.kind(), ErrorKind::RouteNotFound);
}

#[test]
fn test_resolution_is_deterministic() {
    let site = nested_site();
    let resolver = RouteResolver::new(site.root()).expect("Failed to create resolver");

    let first = resolver.resolve("/a/b/c/").expect("Failed to resolve");
    for raw in ["/a/b/c", "//a/b//c", "/a/./b/c/"] {
        assert_eq!(resolver.resolve(raw).expect("Failed to resolve"), first);
    }
}

#[test]
fn test_cache_notices_replaced_executable() {
    let site = nested_site();
    let resolver = RouteResolver::new(site.root()).expect("Failed to create resolver");
    let lookup = RouteLookup::cached(resolver, Arc::new(RouteCache::new(None)), false)
        .expect("Failed to create lookup");

    let first = lookup.lookup("/a").expect("Failed to look up /a");
    assert!(Arc::ptr_eq(&first, &lookup.lookup("/a").expect("Failed to look up /a")));

    // Different length changes the fingerprint
    site.add_route("a/index", "echo replaced with a longer script\nexit 0");
    let second = lookup.lookup("/a").expect("Failed to look up /a");
    assert!(!Arc::ptr_eq(&first, &second));

    // A removed executable is no longer served from the cache
    std::fs::remove_file(site.root().join("a/index")).expect("Failed to remove route");
    assert_eq!(
        lookup.lookup("/a").expect_err("Removed route must fail").kind(),
        ErrorKind::RouteNotFound
    );
}

#[test]
fn test_new_shared_dir_visible_after_invalidation() {
    let site = nested_site();
    let resolver = RouteResolver::new(site.root()).expect("Failed to create resolver");
    let root = resolver.site_root().to_path_buf();
    let lookup = RouteLookup::cached(resolver, Arc::new(RouteCache::new(None)), false)
        .expect("Failed to create lookup");

    let before = lookup.lookup("/").expect("Failed to look up /");
    assert_eq!(before.resource_paths, vec![root.join("shared")]);

    std::fs::remove_dir(root.join("shared")).expect("Failed to remove shared dir");
    lookup.cache().expect("Cache enabled").invalidate_all();

    let after = lookup.lookup("/").expect("Failed to look up /");
    assert!(after.resource_paths.is_empty());
}

#[test]
fn test_watcher_clears_cache_on_tree_change() {
    let site = nested_site();
    let resolver = RouteResolver::new(site.root()).expect("Failed to create resolver");
    let cache = Arc::new(RouteCache::new(None));
    let lookup = RouteLookup::cached(resolver, Arc::clone(&cache), true).expect("Failed to start watcher");

    lookup.lookup("/a").expect("Failed to look up /a");
    lookup.lookup("/a/b/c").expect("Failed to look up /a/b/c");
    assert!(!cache.is_empty());

    site.add_file("a/b/shared/footer.html", "<footer/>");

    let deadline = Instant::now() + Duration::from_secs(5);
    while !cache.is_empty() {
        assert!(Instant::now() < deadline, "watcher never invalidated the cache");
        std::thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(cache.len(), 0);

    // Resolution still works after invalidation
    let entry = lookup.lookup("/a/b/c").expect("Failed to look up /a/b/c");
    assert_eq!(entry.route_path, "/a/b/c");
}
