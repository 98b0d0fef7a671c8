pub mod allocation;
pub mod consignment;
pub mod invoice;
pub mod invoice_item;
pub mod product;
pub mod report_artifact;
