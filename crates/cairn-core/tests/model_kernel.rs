//! Integration tests for the configuration model.
//!
//! Builds a small class hierarchy with objects and verifies the kernel's
//! accessor/mutator contract plus serde round-trips of the model types.

use cairn_core::{
    AttrType, Attribute, Cardinality, ConfClass, Kernel, Method, ObjectRef, Relationship,
};

fn detector_schema(kernel: &mut Kernel) {
    kernel
        .add_class(
            ConfClass::new("Component")
                .abstract_class()
                .with_attribute(Attribute::new("Serial", AttrType::String).not_null()),
        )
        .unwrap();
    kernel
        .add_class(
            ConfClass::new("Module")
                .with_superclass("Component")
                .with_attribute(Attribute::new("Channels", AttrType::U32).with_init_value("0"))
                .with_attribute(Attribute::new("Labels", AttrType::String).multi_value())
                .with_relationship(
                    Relationship::new("Contains", "Chip")
                        .with_cardinality(Cardinality::One, Cardinality::Many)
                        .composite(),
                )
                .with_method(
                    Method::new("configure")
                        .with_description("Push settings to hardware")
                        .with_implementation("c++", "void configure()", "{}"),
                ),
        )
        .unwrap();
    kernel.add_class(ConfClass::new("Chip")).unwrap();
}

#[test]
fn test_kernel_builds_a_populated_model() {
    let mut kernel = Kernel::new();
    detector_schema(&mut kernel);
    assert_eq!(kernel.class_count(), 3);

    let module = kernel.create_object("Module", "mod-01").unwrap();
    let c1 = kernel.create_object("Chip", "chip-01").unwrap();
    let c2 = kernel.create_object("Chip", "chip-02").unwrap();

    kernel.set_value(&module, "Channels", "64").unwrap();
    kernel
        .set_values(
            &module,
            "Labels",
            vec!["front".to_string(), "barrel".to_string()],
        )
        .unwrap();
    kernel
        .set_relations(&module, "Contains", vec![c1.clone(), c2])
        .unwrap();

    let object = kernel.object(&module).unwrap();
    assert_eq!(object.values_of("Channels"), ["64".to_string()]);
    assert_eq!(object.values_of("Labels").len(), 2);
    assert_eq!(object.relations_of("Contains")[0], c1);
    assert_eq!(kernel.object_count(), 3);
}

#[test]
fn test_kernel_rejects_undeclared_structure() {
    let mut kernel = Kernel::new();
    detector_schema(&mut kernel);
    let module = kernel.create_object("Module", "mod-01").unwrap();

    assert!(kernel.create_object("Component", "c-01").is_err());
    assert!(kernel.set_value(&module, "Voltage", "3.3").is_err());
    assert!(kernel
        .set_relation(&module, "PoweredBy", ObjectRef::new("Chip", "chip-01"))
        .is_err());
    assert!(kernel
        .set_values(
            &module,
            "Channels",
            vec!["1".to_string(), "2".to_string()]
        )
        .is_err());
}

#[test]
fn test_class_serde_round_trip() {
    let class = ConfClass::new("Module")
        .with_superclass("Component")
        .with_attribute(
            Attribute::new("Channels", AttrType::U32)
                .with_range("0..1024")
                .not_null(),
        )
        .with_relationship(Relationship::new("Contains", "Chip").many().dependent());

    let json = serde_json::to_string(&class).unwrap();
    let parsed: ConfClass = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, class);
}

#[test]
fn test_objects_iterate_in_stable_order() {
    let mut kernel = Kernel::new();
    detector_schema(&mut kernel);
    kernel.create_object("Chip", "b").unwrap();
    kernel.create_object("Chip", "a").unwrap();
    kernel.create_object("Module", "m").unwrap();

    let keys: Vec<String> = kernel.objects().map(|o| o.key().to_string()).collect();
    assert_eq!(keys, vec!["a@Chip", "b@Chip", "m@Module"]);
}
