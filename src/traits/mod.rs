pub mod coord_store;
