mod linked_hash_set;
