pub mod machine_commander;
