//! Membership churn demo: bootstrap a group, add and remove members, and
//! report the re-key cost of each event.
//!
//! Run with `RUST_LOG=tgdh_tree=debug` to see the tree's own events.

use tgdh_tree::{KeyTree, MemberId, TreeConfig, TreeResult};
use tracing_subscriber::EnvFilter;

fn main() -> TreeResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== Group Key Tree Membership Demo ===");

    println!("\n1. Bootstrapping a group of 4 members...");
    let config = TreeConfig::from_toml("initial_members = 4\nseed = 2024\n")?;
    let mut tree = KeyTree::with_config(&config)?;
    println!("   Members: {:?}", tree.member_ids());
    println!("   Height: {}", tree.tree_height());
    print!("{}", tree);

    println!("\n2. Adding three members...");
    for _ in 0..3 {
        let before = tree.dh_operation_count();
        let id = tree.add_member()?;
        report(&tree, &format!("join {}", id), before);
    }

    println!("\n3. Removing members 1 and 5...");
    for id in [MemberId(1), MemberId(5)] {
        let before = tree.dh_operation_count();
        tree.remove_member(id)?;
        report(&tree, &format!("leave {}", id), before);
    }

    println!("\n4. Removing member 1 again...");
    match tree.remove_member(MemberId(1)) {
        Ok(()) => println!("   unexpectedly succeeded"),
        Err(e) => println!("   rejected: {}", e),
    }

    println!("\n5. Final tree:");
    print!("{}", tree);
    for member in tree.member_ids() {
        println!(
            "   {}: key path {:?}, co-path {:?}",
            member,
            tree.key_path(member)?,
            tree.co_path(member)?
        );
    }

    let group_key = tree.group_key();
    let converged = tree
        .member_ids()
        .into_iter()
        .all(|member| tree.member_group_key(member).ok() == group_key);
    println!("\n   All members agree on the group key: {}", converged);
    println!("   Total DH operations: {}", tree.dh_operation_count());
    println!("   Total broadcasts: {}", tree.broadcast_count());

    println!("\n=== Demo completed successfully! ===");
    Ok(())
}

fn report(tree: &KeyTree, label: &str, dh_before: usize) {
    let Some(broadcast) = tree.last_rekey() else {
        println!("   {}: group is empty", label);
        return;
    };
    println!(
        "   {}: sponsor {}, {} DH ops (height {}), {} recipients",
        label,
        broadcast.sponsor,
        tree.dh_operation_count() - dh_before,
        tree.tree_height(),
        broadcast.recipients.len()
    );
}
