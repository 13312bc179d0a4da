#![no_main]

//! Fuzz target for registry hierarchies
//!
//! Builds a random forest of registries, each with any of the earlier ones
//! as parents, and checks own-first precedence and collection sizes.

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use service_registry::ServiceRegistry;

struct Marker(usize);

#[derive(Debug, Arbitrary)]
struct Node {
    /// Indices into the registries created so far
    parents: Vec<u8>,
    registers: bool,
}

fuzz_target!(|nodes: Vec<Node>| {
    let mut registries: Vec<ServiceRegistry> = Vec::new();
    // Markers visible through each registry's collection lookup
    let mut visible: Vec<usize> = Vec::new();

    for (index, node) in nodes.into_iter().take(16).enumerate() {
        let mut builder = ServiceRegistry::builder().display_name(format!("node-{index}"));
        let mut parent_ids = Vec::new();
        for parent in node.parents.into_iter().take(4) {
            if registries.is_empty() {
                break;
            }
            let parent = usize::from(parent) % registries.len();
            builder = builder.parent(&registries[parent]);
            parent_ids.push(parent);
        }

        let registry = builder.build().expect("parents always precede children");
        if node.registers {
            registry.add(Marker(index)).expect("fresh registry is mutable");
        }

        let expected = usize::from(node.registers)
            + parent_ids.iter().map(|&parent| visible[parent]).sum::<usize>();

        let all = registry.get_all::<Marker>().expect("collections never fail");
        assert_eq!(all.len(), expected);
        if node.registers {
            assert_eq!(all[0].0, index);
            assert_eq!(registry.get::<Marker>().expect("own wins").0, index);
        } else if expected == 0 {
            assert!(registry.get::<Marker>().is_err());
        }

        visible.push(expected);
        registries.push(registry);
    }

    for registry in registries.iter().rev() {
        let _ = registry.close();
    }
});
