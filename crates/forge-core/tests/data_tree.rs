//! Integration tests for data trees built from lazy goals.

use forge_core::{Data, DataFilter, DataNode, ForgeError, Goal, Meta};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn spectrum(name: &str, quality: &str, calls: &Arc<AtomicUsize>) -> Data<Vec<f64>> {
    let calls = Arc::clone(calls);
    let goal = Goal::lazy(name, async move {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![1.0, 2.0, 3.0])
    });
    Data::new(name, goal, Meta::builder(name).set("quality", quality).build())
}

fn runs(calls: &Arc<AtomicUsize>) -> DataNode<Vec<f64>> {
    let mut builder = DataNode::builder("runs");
    builder
        .put_data("set1.run_1", spectrum("run_1", "good", calls))
        .put_data("set1.run_2", spectrum("run_2", "bad", calls))
        .put_data("set2.run_3", spectrum("run_3", "good", calls));
    builder.build()
}

#[test]
fn test_resolution_does_not_compute() {
    let calls = Arc::new(AtomicUsize::new(0));
    let tree = runs(&calls);

    assert!(tree.opt_data("set1.run_2").is_some());
    assert!(tree.opt_data("set3.run_2").is_none());
    assert_eq!(tree.count(true), 3);
    assert_eq!(tree.nodes().map(|(name, _)| name).collect::<Vec<_>>(), vec!["set1", "set2"]);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_filter_by_meta_keeps_structure() {
    let calls = Arc::new(AtomicUsize::new(0));
    let tree = runs(&calls);

    let good = tree.filter(&DataFilter::meta(|meta| meta.get_str("quality") == Some("good")));
    let paths: Vec<String> = good.items(true).map(|(path, _)| path).collect();
    assert_eq!(paths, vec!["set1.run_1", "set2.run_3"]);

    let report = good.compute_all().await;
    assert!(report.is_success());
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // items are shared with the source tree, so nothing is recomputed
    tree.get_data("set1.run_1").unwrap().wait().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_erased_tree_round_trips_through_checked() {
    let calls = Arc::new(AtomicUsize::new(0));
    let erased = runs(&calls).erase();

    let typed = erased.checked::<Vec<f64>>().unwrap();
    assert_eq!(typed.type_name(), std::any::type_name::<Vec<f64>>());
    let values = typed.compute_all().await.into_result().unwrap();
    assert_eq!(values.len(), 3);

    let err = erased.checked::<String>().unwrap_err();
    match err {
        ForgeError::TypeMismatch { path, .. } => assert_eq!(path, "set1.run_1"),
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_edit_never_touches_built_node() {
    let calls = Arc::new(AtomicUsize::new(0));
    let tree = runs(&calls);

    let mut editor = tree.edit();
    editor.put_static("set1.run_1", vec![0.0]).set_name("edited");
    let edited = editor.build();

    assert_eq!(edited.name(), "edited");
    assert_eq!(tree.name(), "runs");
    assert!(!tree.get_data("set1.run_1").unwrap().goal().is_done());
    assert_eq!(edited.get_data("set1.run_1").unwrap().get().unwrap(), vec![0.0]);
}
