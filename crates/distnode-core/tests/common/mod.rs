pub mod storage_node;
