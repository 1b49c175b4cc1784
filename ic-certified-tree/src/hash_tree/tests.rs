use super::{empty, fork, label, leaf, pruned, pruned_from_hex, HashTree, Label};

const EXAMPLE_CBOR: &str = "8301830183024161830183018302417882034568656c6c6f810083024179820345776f726c6483024162820344676f6f648301830241638100830241648203476d6f726e696e67";
const EXAMPLE_DIGEST: &str = "eb5c5b2195e62d996b84c9bcc8259d19a83786a2f59e0878cec84c811f669aa0";

fn example_tree() -> HashTree {
    fork(
        fork(
            label(
                "a",
                fork(
                    fork(label("x", leaf(b"hello")), empty()),
                    label("y", leaf(b"world")),
                ),
            ),
            label("b", leaf(b"good")),
        ),
        fork(label("c", empty()), label("d", leaf(b"morning"))),
    )
}

fn example_tree_pruned() -> HashTree {
    fork(
        fork(
            label(
                "a",
                fork(
                    pruned_from_hex(
                        "1b4feff9bef8131788b0c9dc6dbad6e81e524249c879e9f10f71ce3749f5a638",
                    )
                    .unwrap(),
                    label("y", leaf(b"world")),
                ),
            ),
            label(
                "b",
                pruned_from_hex("7b32ac0c6ba8ce35ac82c255fc7906f7fc130dab2a090f80fe12f9c2cae83ba6")
                    .unwrap(),
            ),
        ),
        fork(
            pruned_from_hex("ec8324b8a1f1ac16bd2e806edba78006479c9877fed4eb464a25485465af601d")
                .unwrap(),
            label("d", leaf(b"morning")),
        ),
    )
}

#[test]
fn works_with_simple_tree() {
    let tree = fork(
        label("label 1", empty()),
        fork(pruned([1u8; 32]), leaf([1u8, 2, 3, 4, 5, 6])),
    );

    assert_eq!(
        hex::encode(tree.digest()),
        "69cf325d0f20505b261821a7e77ff72fb9a8753a7964f0b587553bfb44e72532"
    );
}

#[test]
fn example_tree_encodes_and_hashes() {
    let tree = example_tree();
    assert_eq!(hex::encode(serde_cbor::to_vec(&tree).unwrap()), EXAMPLE_CBOR);
    assert_eq!(hex::encode(tree.digest()), EXAMPLE_DIGEST);
}

#[test]
fn decoded_fixture_reconstructs_root() {
    let bytes = hex::decode(EXAMPLE_CBOR).unwrap();
    let tree: HashTree = serde_cbor::from_slice(&bytes).unwrap();
    assert_eq!(tree, example_tree());
    assert_eq!(hex::encode(tree.digest()), EXAMPLE_DIGEST);
}

#[test]
fn pruned_tree_has_same_root() {
    let tree = example_tree_pruned();
    assert_eq!(hex::encode(tree.digest()), EXAMPLE_DIGEST);

    let bytes = serde_cbor::to_vec(&tree).unwrap();
    let decoded: HashTree = serde_cbor::from_slice(&bytes).unwrap();
    assert_eq!(hex::encode(decoded.digest()), EXAMPLE_DIGEST);
}

#[test]
fn lookup_in_full_tree() {
    let tree = example_tree();
    assert_eq!(tree.lookup_path(["a", "x"]), Some(&b"hello"[..]));
    assert_eq!(tree.lookup_path(["a", "y"]), Some(&b"world"[..]));
    assert_eq!(tree.lookup_path(["b"]), Some(&b"good"[..]));
    assert_eq!(tree.lookup_path(["d"]), Some(&b"morning"[..]));
    assert_eq!(tree.lookup_path(["c"]), None);
    assert_eq!(tree.lookup_path(["e"]), None);
    assert_eq!(tree.lookup_path(["a"]), None);
    assert_eq!(tree.lookup_path(["a", "x", "z"]), None);
}

#[test]
fn lookup_into_pruned_branch_is_not_found() {
    let tree = example_tree_pruned();
    assert_eq!(tree.lookup_path(["a", "y"]), Some(&b"world"[..]));
    assert_eq!(tree.lookup_path(["a", "x"]), None);
    assert_eq!(tree.lookup_path(["b"]), None);
    assert_eq!(tree.lookup_path(["c"]), None);
    assert_eq!(tree.lookup_path(["d"]), Some(&b"morning"[..]));
}

#[test]
fn empty_path_only_finds_leaves() {
    assert_eq!(leaf(b"v").lookup_path(Vec::<&[u8]>::new()), Some(&b"v"[..]));
    assert_eq!(empty().lookup_path(Vec::<&[u8]>::new()), None);
    assert_eq!(pruned([0u8; 32]).lookup_path(Vec::<&[u8]>::new()), None);
    assert_eq!(example_tree().lookup_path(Vec::<&[u8]>::new()), None);
}

#[test]
fn lookup_does_not_assume_sorted_labels() {
    let tree = fork(
        label("z", leaf(b"last")),
        fork(label("a", leaf(b"first")), label("m", leaf(b"middle"))),
    );
    assert_eq!(tree.lookup_path(["a"]), Some(&b"first"[..]));
    assert_eq!(tree.lookup_path(["m"]), Some(&b"middle"[..]));
    assert_eq!(tree.lookup_path(["z"]), Some(&b"last"[..]));
}

#[test]
fn lookup_binary_labels() {
    let id = [0u8, 0, 0, 0, 0, 0, 0, 1, 1, 1];
    let tree = label("subnet", label(id, label("public_key", leaf(vec![7u8; 4]))));
    assert_eq!(
        tree.lookup_path([&b"subnet"[..], &id[..], &b"public_key"[..]]),
        Some(&[7u8; 4][..])
    );
}

#[test]
fn subtree_and_children() {
    let tree = example_tree();
    let a = tree.lookup_subtree(["a"]).unwrap();
    let names: Vec<Label> = a.children().into_iter().map(|(l, _)| l.clone()).collect();
    assert_eq!(names, vec![Label::from("x"), Label::from("y")]);
    assert!(tree.lookup_subtree(["q"]).is_none());
}

#[test]
fn list_paths_finds_every_leaf() {
    let paths = example_tree().list_paths();
    let expected: Vec<Vec<Label>> = vec![
        vec!["a".into(), "x".into()],
        vec!["a".into(), "y".into()],
        vec!["b".into()],
        vec!["d".into()],
    ];
    assert_eq!(paths, expected);
}

#[test]
fn rejects_unknown_tag() {
    // [5]
    let err = serde_cbor::from_slice::<HashTree>(&[0x81, 0x05]).unwrap_err();
    assert!(err.to_string().contains("Unknown tag: 5"));
}

#[test]
fn rejects_short_pruned_digest() {
    // [4 h'0102']
    let err = serde_cbor::from_slice::<HashTree>(&[0x82, 0x04, 0x42, 0x01, 0x02]);
    assert!(err.is_err());
}

#[test]
fn label_display() {
    assert_eq!(Label::from("time").to_string(), "\"time\"");
    assert_eq!(Label::from([0u8, 1]).to_string(), "0x0001");
}
