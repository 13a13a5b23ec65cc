pub mod builder;
pub mod context;
pub mod policy;
pub mod retriever;
pub mod vector_index;

#[cfg(test)]
pub(crate) mod test_support;
